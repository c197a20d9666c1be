//! Error surfacing and edge case tests.

mod common;

use common::{roles_query, store_with};
use livetable::{
    row, ChangeEvent, Connection, EventSink, LiveEvent, LiveStore, Result, StoreConfig,
    SubscribeError, SubscribeQuery, UpsertKey, UpsertReducer,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// --- Transport Errors ---

#[test]
fn test_open_failure_is_published_not_returned() {
    let (store, transport) = store_with(StoreConfig::default());
    transport.refuse_next(SubscribeError::Transport("503 Service Unavailable".to_string()));

    let observer = store.attach("roles", roles_query()).unwrap();
    let snapshot = observer.current();
    assert_eq!(
        snapshot.error,
        Some(SubscribeError::Transport("503 Service Unavailable".to_string()))
    );
    assert!(!snapshot.running);
    assert!(!snapshot.is_loading());
    assert_eq!(transport.open_count(), 0);

    // Retrying is up to the caller.
    store.restart("roles").unwrap();
    assert_eq!(transport.open_count(), 1);
    assert!(observer.current().error.is_none());
}

#[test]
fn test_failure_keeps_last_rows_and_stops_delivery() {
    let (store, transport) = store_with(StoreConfig::default());
    let observer = store.attach("roles", roles_query()).unwrap();
    let sink = transport.last_sink();

    sink.send(ChangeEvent::insert(row(json!({"id": 1, "name": "a"}))));
    sink.send(ChangeEvent::SnapshotComplete);
    sink.fail(SubscribeError::Server {
        message: "subscribe dropped".to_string(),
        code: Some("XX000".to_string()),
    });

    assert_eq!(transport.close_count(), 1);
    assert!(!sink.send(ChangeEvent::insert(row(json!({"id": 2})))));

    let snapshot = observer.current();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.snapshot_complete);
    assert!(matches!(snapshot.error, Some(SubscribeError::Server { .. })));

    // A second failure from the same run is ignored.
    sink.fail(SubscribeError::Transport("late".to_string()));
    assert!(matches!(observer.current().error, Some(SubscribeError::Server { .. })));
}

#[test]
fn test_failure_during_open() {
    // The transport fails through the sink before handing back its connection.
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    let transport = move |_query: &SubscribeQuery, sink: EventSink| -> Result<Box<dyn Connection>> {
        sink.fail(SubscribeError::Transport("handshake failed".to_string()));
        let counter = counter.clone();
        Ok(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    };
    let store = LiveStore::new(transport, StoreConfig::default());

    let observer = store.attach("roles", roles_query()).unwrap();
    assert!(observer.current().error.is_some());
    assert!(!observer.current().running);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

// --- Malformed Events ---

#[test]
fn test_malformed_event_is_rejected() {
    let (store, transport) = store_with(StoreConfig::default());
    let observer = store.attach("roles", roles_query()).unwrap();
    let sink = transport.last_sink();

    sink.send(ChangeEvent::insert(row(json!({"id": 1, "name": "a"}))));
    assert!(sink.send(ChangeEvent::insert(row(json!({"name": "orphan"})))));

    let snapshot = observer.latest().unwrap();
    assert_eq!(snapshot.len(), 1);
    match &snapshot.error {
        Some(SubscribeError::MissingKeyField { field, .. }) => assert_eq!(field, "id"),
        other => panic!("Expected MissingKeyField, got {:?}", other),
    }

    // The subscription keeps running; the error stays until restart.
    assert!(sink.send(ChangeEvent::insert(row(json!({"id": 2, "name": "b"})))));
    let snapshot = observer.current();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.error.is_some());
}

#[test]
fn test_malformed_event_in_batch_skips_only_itself() {
    let (store, transport) = store_with(StoreConfig::default());
    let observer = store.attach("roles", roles_query()).unwrap();

    transport.last_sink().send_batch(vec![
        ChangeEvent::insert(row(json!({"id": 1}))),
        ChangeEvent::delete(row(json!({"name": "no key"}))),
        ChangeEvent::insert(row(json!({"id": 2}))),
    ]);

    let snapshot = observer.current();
    assert_eq!(snapshot.len(), 2);
    assert!(matches!(
        snapshot.error,
        Some(SubscribeError::MissingKeyField { .. })
    ));
}

#[test]
fn test_report_is_non_fatal() {
    let (store, transport) = store_with(StoreConfig::default());
    let observer = store.attach("roles", roles_query()).unwrap();
    let sink = transport.last_sink();

    assert!(sink.report(SubscribeError::KeyViolation("{\"id\":1}".to_string())));
    assert!(sink.is_active());
    assert!(matches!(
        observer.current().error,
        Some(SubscribeError::KeyViolation(_))
    ));
}

// --- Reducer Edge Cases ---

#[test]
fn test_delete_never_inserted_is_noop() {
    let mut reducer = UpsertReducer::new(UpsertKey::single("id").unwrap());
    reducer
        .apply(&ChangeEvent::delete(row(json!({"id": 42}))))
        .unwrap();
    assert!(reducer.rows().is_empty());
}

#[test]
fn test_insert_then_delete_same_key_in_one_batch() {
    let mut reducer = UpsertReducer::new(UpsertKey::single("id").unwrap());
    let batch = vec![
        ChangeEvent::insert(row(json!({"id": 1}))),
        ChangeEvent::delete(row(json!({"id": 1}))),
    ];
    reducer.apply_all(&batch).unwrap();
    assert!(reducer.rows().is_empty());
}

// --- Registration Errors ---

#[test]
fn test_invalid_query_key() {
    assert!(matches!(
        SubscribeQuery::new("SELECT 1", Vec::<String>::new()),
        Err(SubscribeError::InvalidKey(_))
    ));
}

#[test]
fn test_mismatched_query_under_same_key() {
    let (store, _) = store_with(StoreConfig::default());
    let _observer = store.attach("roles", roles_query()).unwrap();

    let result = store.attach(
        "roles",
        SubscribeQuery::new("SELECT id, name FROM mz_roles", ["name"]).unwrap(),
    );
    assert!(matches!(result, Err(SubscribeError::QueryMismatch(_))));
}

#[test]
fn test_observer_sees_error_event() {
    let (store, transport) = store_with(StoreConfig::default());
    let observer = store.attach("roles", roles_query()).unwrap();
    observer.latest();

    transport
        .last_sink()
        .fail(SubscribeError::Transport("eof".to_string()));

    match observer.try_recv().unwrap() {
        LiveEvent::State(snapshot) => {
            assert_eq!(snapshot.error, Some(SubscribeError::Transport("eof".to_string())));
        }
        other => panic!("Expected State, got {:?}", other),
    }
}
