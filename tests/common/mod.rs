//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use livetable::{
    Connection, EventSink, LiveStore, Result, StoreConfig, SubscribeError, SubscribeQuery,
    Transport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records every opened subscription so tests can play the server.
#[derive(Default)]
pub struct ScriptedTransport {
    opened: Mutex<Vec<(SubscribeQuery, EventSink)>>,
    closed: Arc<AtomicUsize>,
    refuse_with: Mutex<Option<SubscribeError>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` fail.
    pub fn refuse_next(&self, error: SubscribeError) {
        *self.refuse_with.lock() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sink of the most recently opened subscription.
    pub fn last_sink(&self) -> EventSink {
        self.opened.lock().last().expect("nothing opened").1.clone()
    }

    /// Sink of the most recent subscription for `select`.
    pub fn sink_for(&self, select: &str) -> EventSink {
        self.opened
            .lock()
            .iter()
            .rev()
            .find(|(q, _)| q.select == select)
            .expect("query never opened")
            .1
            .clone()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, query: &SubscribeQuery, sink: EventSink) -> Result<Box<dyn Connection>> {
        if let Some(error) = self.refuse_with.lock().take() {
            return Err(error);
        }
        self.opened.lock().push((query.clone(), sink));

        let closed = self.closed.clone();
        Ok(Box::new(move || {
            closed.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Route store logs to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn store_with(config: StoreConfig) -> (LiveStore, Arc<ScriptedTransport>) {
    init_tracing();
    let transport = ScriptedTransport::new();
    let store = LiveStore::with_transport(transport.clone(), config);
    (store, transport)
}

pub fn roles_query() -> SubscribeQuery {
    SubscribeQuery::new("SELECT id, name FROM mz_roles", ["id"]).unwrap()
}

pub fn clusters_query() -> SubscribeQuery {
    SubscribeQuery::new("SELECT id, name, size FROM mz_clusters", ["id"]).unwrap()
}
