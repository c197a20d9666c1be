//! Folding change events into a materialized row set.

use super::key::{RowKey, UpsertKey};
use crate::error::Result;
use crate::types::{ChangeEvent, Diff, Row, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

/// Materialized rows, at most one per key.
///
/// Storage is shared between clones; a clone taken for a published snapshot
/// stays fixed while the reducer keeps mutating its own copy.
#[derive(Clone, Debug, Default)]
pub struct RowSet {
    rows: Arc<HashMap<RowKey, Row>>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &Row)> {
        self.rows.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.rows.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Rows ordered by key.
    pub fn to_sorted_vec(&self) -> Vec<Row> {
        let mut entries: Vec<_> = self.rows.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, row)| row.clone()).collect()
    }

    /// True if both sets share the same storage.
    pub fn ptr_eq(&self, other: &RowSet) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }

    fn upsert(&mut self, key: RowKey, row: Row) -> Option<Row> {
        Arc::make_mut(&mut self.rows).insert(key, row)
    }

    fn remove(&mut self, key: &RowKey) -> Option<Row> {
        if !self.rows.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.rows).remove(key)
    }
}

/// What an event did to the row set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// New key added.
    Inserted,
    /// Existing key overwritten.
    Replaced,
    /// Existing key removed.
    Deleted,
    /// Delete for a key that was not present.
    Absent,
    /// Snapshot marker observed.
    SnapshotComplete,
    /// Frontier advanced.
    Progress,
}

impl Applied {
    /// Whether the row contents changed.
    pub fn changed_rows(self) -> bool {
        matches!(self, Applied::Inserted | Applied::Replaced | Applied::Deleted)
    }
}

/// Upsert reducer over a change feed.
#[derive(Clone, Debug)]
pub struct UpsertReducer {
    key: UpsertKey,
    rows: RowSet,
    snapshot_complete: bool,
    frontier: Option<Timestamp>,
    applied: u64,
}

impl UpsertReducer {
    pub fn new(key: UpsertKey) -> Self {
        Self {
            key,
            rows: RowSet::new(),
            snapshot_complete: false,
            frontier: None,
            applied: 0,
        }
    }

    /// Apply one event.
    ///
    /// A malformed event leaves the reducer untouched.
    pub fn apply(&mut self, event: &ChangeEvent) -> Result<Applied> {
        let applied = match event {
            ChangeEvent::Update { diff, row, .. } => {
                let key = self.key.extract(row)?;
                match diff {
                    Diff::Insert => match self.rows.upsert(key, row.clone()) {
                        Some(_) => Applied::Replaced,
                        None => Applied::Inserted,
                    },
                    Diff::Delete => match self.rows.remove(&key) {
                        Some(_) => Applied::Deleted,
                        None => Applied::Absent,
                    },
                }
            }
            ChangeEvent::Progress { timestamp } => {
                self.frontier = Some(self.frontier.map_or(*timestamp, |f| f.max(*timestamp)));
                Applied::Progress
            }
            ChangeEvent::SnapshotComplete => {
                self.snapshot_complete = true;
                Applied::SnapshotComplete
            }
        };

        self.applied += 1;
        Ok(applied)
    }

    /// Apply events in order, stopping at the first malformed one.
    ///
    /// Events before the failing one stay applied.
    pub fn apply_all<'a, I>(&mut self, events: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        let mut count = 0;
        for event in events {
            self.apply(event)?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop all rows and clear the snapshot flag.
    pub fn reset(&mut self) {
        self.rows = RowSet::new();
        self.snapshot_complete = false;
        self.frontier = None;
        self.applied = 0;
    }

    pub fn key(&self) -> &UpsertKey {
        &self.key
    }

    /// The current rows (shares storage, O(1)).
    pub fn rows(&self) -> RowSet {
        self.rows.clone()
    }

    pub fn snapshot_complete(&self) -> bool {
        self.snapshot_complete
    }

    /// Highest progress timestamp seen.
    pub fn frontier(&self) -> Option<Timestamp> {
        self.frontier
    }

    /// Number of events applied since the last reset.
    pub fn applied_count(&self) -> u64 {
        self.applied
    }
}
