//! Property tests for upsert reduction.

use livetable::{row, ChangeEvent, RowKey, UpsertKey, UpsertReducer};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Insert(u8, u16),
    Delete(u8),
    Marker,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..8, any::<u16>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => (0u8..8).prop_map(Op::Delete),
        1 => Just(Op::Marker),
    ]
}

fn to_event(op: &Op) -> ChangeEvent {
    match op {
        Op::Insert(k, v) => ChangeEvent::insert(row(json!({"id": k, "v": v}))),
        Op::Delete(k) => ChangeEvent::delete(row(json!({"id": k}))),
        Op::Marker => ChangeEvent::SnapshotComplete,
    }
}

proptest! {
    #[test]
    fn final_rows_are_last_write_wins(ops in prop::collection::vec(op(), 0..200)) {
        let mut reducer = UpsertReducer::new(UpsertKey::single("id").unwrap());
        let mut model: HashMap<u8, u16> = HashMap::new();

        for op in &ops {
            reducer.apply(&to_event(op)).unwrap();
            match op {
                Op::Insert(k, v) => { model.insert(*k, *v); }
                Op::Delete(k) => { model.remove(k); }
                Op::Marker => {}
            }
        }

        let rows = reducer.rows();
        prop_assert_eq!(rows.len(), model.len());
        for (k, v) in &model {
            let key = RowKey::from_values([&json!(k)]);
            let stored = rows.get(&key);
            prop_assert!(stored.is_some());
            prop_assert_eq!(&stored.unwrap()["v"], &json!(v));
        }
    }

    #[test]
    fn snapshot_flag_flips_once(ops in prop::collection::vec(op(), 0..100)) {
        let mut reducer = UpsertReducer::new(UpsertKey::single("id").unwrap());
        let mut seen_marker = false;

        for op in &ops {
            reducer.apply(&to_event(op)).unwrap();
            seen_marker |= matches!(op, Op::Marker);
            prop_assert_eq!(reducer.snapshot_complete(), seen_marker);
        }
    }

    #[test]
    fn deletes_of_unknown_keys_change_nothing(
        inserts in prop::collection::vec(0u8..4, 0..20),
        deletes in prop::collection::vec(100u8..200, 1..20),
    ) {
        let mut reducer = UpsertReducer::new(UpsertKey::single("id").unwrap());
        for k in &inserts {
            reducer.apply(&ChangeEvent::insert(row(json!({"id": k})))).unwrap();
        }
        let before = reducer.rows();

        for k in &deletes {
            reducer.apply(&ChangeEvent::delete(row(json!({"id": k})))).unwrap();
        }
        prop_assert!(reducer.rows().ptr_eq(&before));
    }
}
