//! Core types for change feeds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of a subscription: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Logical timestamp of a change (`mz_timestamp`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Polarity of a row mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diff {
    /// +1: the row is present (upsert).
    Insert,
    /// -1: the row is retracted.
    Delete,
}

impl Diff {
    /// Polarity of a multiplicity. Zero carries no change.
    pub fn from_multiplicity(n: i64) -> Option<Self> {
        match n {
            0 => None,
            n if n > 0 => Some(Diff::Insert),
            _ => Some(Diff::Delete),
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Diff::Insert => 1,
            Diff::Delete => -1,
        }
    }
}

/// A single notification from a streaming query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A row was inserted or deleted.
    Update {
        diff: Diff,
        row: Row,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },

    /// All changes up to (not including) `timestamp` have been delivered.
    Progress { timestamp: Timestamp },

    /// The initial consistent state has been fully delivered.
    SnapshotComplete,
}

impl ChangeEvent {
    /// An untimestamped insert.
    pub fn insert(row: Row) -> Self {
        ChangeEvent::Update {
            diff: Diff::Insert,
            row,
            timestamp: None,
        }
    }

    /// An untimestamped delete.
    pub fn delete(row: Row) -> Self {
        ChangeEvent::Update {
            diff: Diff::Delete,
            row,
            timestamp: None,
        }
    }

    /// Attach a timestamp to an update. Markers are returned unchanged.
    pub fn at(self, ts: Timestamp) -> Self {
        match self {
            ChangeEvent::Update { diff, row, .. } => ChangeEvent::Update {
                diff,
                row,
                timestamp: Some(ts),
            },
            other => other,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, ChangeEvent::Update { .. })
    }
}

/// Build a [`Row`] from a JSON object literal.
///
/// Returns an empty row if the value is not an object.
pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}
