//! The seam between the store and the streaming transport.

use super::manager::{Delivery, LiveQuery, StoreInner};
use crate::error::{Result, SubscribeError};
use crate::query::SubscribeQuery;
use crate::types::ChangeEvent;
use std::sync::Weak;

/// Opens streaming subscriptions.
///
/// Implementations push events into the given [`EventSink`] in the order the
/// server produced them, from any thread.
pub trait Transport: Send + Sync {
    fn open(&self, query: &SubscribeQuery, sink: EventSink) -> Result<Box<dyn Connection>>;
}

impl<F> Transport for F
where
    F: Fn(&SubscribeQuery, EventSink) -> Result<Box<dyn Connection>> + Send + Sync,
{
    fn open(&self, query: &SubscribeQuery, sink: EventSink) -> Result<Box<dyn Connection>> {
        self(query, sink)
    }
}

/// An open subscription on the transport.
pub trait Connection: Send {
    /// Release transport resources.
    ///
    /// Called at most once, possibly from inside an [`EventSink`] call on the
    /// transport's own delivery thread.
    fn close(&mut self);
}

impl<F> Connection for F
where
    F: FnMut() + Send,
{
    fn close(&mut self) {
        self()
    }
}

/// Where a transport delivers events for one run of a subscription.
///
/// A sink belongs to a single run: once the subscription is stopped,
/// restarted or failed, deliveries through it are dropped unapplied.
#[derive(Clone)]
pub struct EventSink {
    store: Weak<StoreInner>,
    query: Weak<LiveQuery>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(store: Weak<StoreInner>, query: Weak<LiveQuery>, generation: u64) -> Self {
        Self {
            store,
            query,
            generation,
        }
    }

    /// Deliver one event. Returns false once the run is over.
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.send_batch(std::iter::once(event))
    }

    /// Deliver events in order, publishing a single new state for the batch.
    ///
    /// Returns false once the run is over; the transport should stop.
    pub fn send_batch<I>(&self, events: I) -> bool
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        let Some(query) = self.query.upgrade() else {
            return false;
        };

        match query.deliver(self.generation, events) {
            Delivery::Stale => false,
            Delivery::Applied { unobserved } => {
                if unobserved {
                    if let Some(store) = self.store.upgrade() {
                        store.on_unobserved(&query);
                    }
                }
                query.is_current(self.generation)
            }
        }
    }

    /// Record a non-fatal error; deliveries continue.
    pub fn report(&self, error: SubscribeError) -> bool {
        match self.query.upgrade() {
            Some(query) => query.report(self.generation, error),
            None => false,
        }
    }

    /// End the run with an error. Rows stay visible to observers.
    pub fn fail(&self, error: SubscribeError) {
        if let Some(query) = self.query.upgrade() {
            query.fail(self.generation, error);
        }
    }

    /// End the run without an error, once the server has finished the feed.
    pub fn finish(&self) {
        if let Some(query) = self.query.upgrade() {
            query.finish(self.generation);
        }
    }

    /// Whether deliveries through this sink are still applied.
    pub fn is_active(&self) -> bool {
        self.query
            .upgrade()
            .map_or(false, |query| query.is_current(self.generation))
    }

    /// Run number this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}
