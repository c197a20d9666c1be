//! Types published to observers of live subscriptions.

use crate::error::SubscribeError;
use crate::types::{Row, Timestamp};
use crate::upsert::{RowKey, RowSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// What happens to a subscription when its last observer detaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Stop the subscription and discard its rows.
    #[default]
    StopOnLastDetach,
    /// Keep up to `max_idle` unobserved subscriptions running; the least
    /// recently idled ones beyond that are stopped.
    KeepIdle { max_idle: usize },
    /// Keep running until stopped explicitly or the store shuts down.
    KeepAlive,
}

/// Configuration for a [`LiveStore`](super::LiveStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Max buffered states per observer before the observer is dropped.
    /// Default: 256
    pub observer_buffer: usize,

    /// Policy applied when a subscription loses its last observer.
    pub teardown: TeardownPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            observer_buffer: 256,
            teardown: TeardownPolicy::default(),
        }
    }
}

/// Point-in-time state of one live subscription.
#[derive(Clone, Debug)]
pub struct LiveSnapshot {
    /// Logical key the subscription is registered under.
    pub key: String,
    /// Materialized rows.
    pub rows: RowSet,
    /// True once the initial consistent state has been delivered.
    pub snapshot_complete: bool,
    /// Last error from the transport or from a rejected event.
    pub error: Option<SubscribeError>,
    /// Highest progress timestamp seen.
    pub frontier: Option<Timestamp>,
    /// Whether events are still being delivered.
    pub running: bool,
    /// Increases with every published change.
    pub version: u64,
}

impl LiveSnapshot {
    /// Still waiting for the initial state, with nothing gone wrong.
    pub fn is_loading(&self) -> bool {
        !self.snapshot_complete && self.error.is_none()
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows ordered by key.
    pub fn to_vec(&self) -> Vec<Row> {
        self.rows.to_sorted_vec()
    }

    /// Rows ordered by a caller-supplied comparison.
    pub fn rows_sorted_by<F>(&self, mut compare: F) -> Vec<Row>
    where
        F: FnMut(&Row, &Row) -> Ordering,
    {
        let mut rows: Vec<Row> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| compare(a, b));
        rows
    }
}

/// Events delivered to an observer.
#[derive(Clone, Debug)]
pub enum LiveEvent {
    /// New state of the subscription.
    State(Arc<LiveSnapshot>),
    /// The observer was detached by the store.
    Dropped { reason: DropReason },
}

/// Why an observer was detached by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Observer buffer overflowed (slow consumer).
    BufferOverflow,
    /// The subscription was stopped explicitly.
    Stopped,
    /// The store shut down.
    Shutdown,
}

/// Unique identifier for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);
