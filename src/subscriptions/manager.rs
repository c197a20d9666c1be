//! Live store: one subscription per logical key, shared by its observers.

use crate::error::{Result, SubscribeError};
use crate::query::SubscribeQuery;
use crate::types::ChangeEvent;
use crate::upsert::UpsertReducer;
use crossbeam_channel::{bounded, Receiver, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::transport::{Connection, EventSink, Transport};
use super::types::{DropReason, LiveEvent, LiveSnapshot, ObserverId, StoreConfig, TeardownPolicy};

/// Outcome of delivering events to a subscription.
pub(crate) enum Delivery {
    /// The run is over; nothing was applied.
    Stale,
    /// Applied. `unobserved` is set if overflow dropped the last observer.
    Applied { unobserved: bool },
}

/// Mutable state of one subscription.
struct QueryState {
    /// Bumped whenever a run starts or ends; sinks of older runs are stale.
    generation: u64,
    running: bool,
    /// Removed from the registry; never runs again.
    retired: bool,
    reducer: UpsertReducer,
    error: Option<SubscribeError>,
    version: u64,
    observers: Vec<(ObserverId, Sender<LiveEvent>)>,
    connection: Option<Box<dyn Connection>>,
}

impl QueryState {
    /// Begin a new run with an empty row set.
    fn start(&mut self) -> u64 {
        self.generation += 1;
        self.running = true;
        self.reducer.reset();
        self.error = None;
        self.version += 1;
        self.generation
    }

    /// End the current run, handing back the connection to close.
    fn halt(&mut self) -> Option<Box<dyn Connection>> {
        self.generation += 1;
        self.running = false;
        self.connection.take()
    }

    fn snapshot(&self, key: &str) -> Arc<LiveSnapshot> {
        Arc::new(LiveSnapshot {
            key: key.to_string(),
            rows: self.reducer.rows(),
            snapshot_complete: self.reducer.snapshot_complete(),
            error: self.error.clone(),
            frontier: self.reducer.frontier(),
            running: self.running,
            version: self.version,
        })
    }

    /// Send the current state to every observer. Drops observers whose
    /// buffer is full; returns true if that left none.
    fn publish(&mut self, key: &str) -> bool {
        if self.observers.is_empty() {
            return false;
        }

        let snapshot = self.snapshot(key);
        let before = self.observers.len();

        self.observers.retain(|(id, sender)| {
            let states = sender.capacity().map_or(usize::MAX, |c| c.saturating_sub(1));
            let sent = sender.len() < states
                && sender.try_send(LiveEvent::State(snapshot.clone())).is_ok();
            if !sent {
                warn!(key, observer = id.0, "dropping slow observer");
                let _ = sender.try_send(LiveEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
            sent
        });

        before > 0 && self.observers.is_empty()
    }
}

/// One logical subscription and its materialized state.
pub(crate) struct LiveQuery {
    key: String,
    query: SubscribeQuery,
    state: Mutex<QueryState>,
}

impl LiveQuery {
    fn new(key: String, query: SubscribeQuery) -> Self {
        let reducer = UpsertReducer::new(query.upsert_key.clone());
        Self {
            key,
            query,
            state: Mutex::new(QueryState {
                generation: 0,
                running: false,
                retired: false,
                reducer,
                error: None,
                version: 0,
                observers: Vec::new(),
                connection: None,
            }),
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.running && state.generation == generation
    }

    /// Apply events from run `generation` and publish the result.
    pub(crate) fn deliver<I>(&self, generation: u64, events: I) -> Delivery
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        let mut state = self.state.lock();
        if !state.running || state.generation != generation {
            trace!(key = %self.key, generation, "dropping stale delivery");
            return Delivery::Stale;
        }

        let mut changed = false;
        for event in events {
            let was_complete = state.reducer.snapshot_complete();
            match state.reducer.apply(&event) {
                Ok(applied) => {
                    if applied.changed_rows() || was_complete != state.reducer.snapshot_complete() {
                        changed = true;
                    }
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "rejected malformed event");
                    state.error = Some(e);
                    changed = true;
                }
            }
        }

        if !changed {
            return Delivery::Applied { unobserved: false };
        }

        state.version += 1;
        let unobserved = state.publish(&self.key);
        Delivery::Applied { unobserved }
    }

    /// Record a non-fatal error for run `generation`.
    pub(crate) fn report(&self, generation: u64, error: SubscribeError) -> bool {
        let mut state = self.state.lock();
        if !state.running || state.generation != generation {
            return false;
        }
        warn!(key = %self.key, error = %error, "subscription reported error");
        state.error = Some(error);
        state.version += 1;
        state.publish(&self.key);
        true
    }

    /// End run `generation` with an error.
    pub(crate) fn fail(&self, generation: u64, error: SubscribeError) {
        self.end(generation, Some(error));
    }

    /// End run `generation` because the feed is over.
    pub(crate) fn finish(&self, generation: u64) {
        self.end(generation, None);
    }

    fn end(&self, generation: u64, error: Option<SubscribeError>) {
        let connection = {
            let mut state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }
            match error {
                Some(error) => {
                    warn!(key = %self.key, error = %error, "subscription failed");
                    state.error = Some(error);
                }
                None => info!(key = %self.key, "subscription finished"),
            }
            let connection = state.halt();
            state.version += 1;
            state.publish(&self.key);
            connection
        };

        if let Some(mut connection) = connection {
            connection.close();
        }
    }

    /// Keep the connection of run `generation`, or hand it back if that run
    /// already ended.
    fn install(
        &self,
        generation: u64,
        connection: Box<dyn Connection>,
    ) -> Option<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.running && state.generation == generation {
            state.connection = Some(connection);
            None
        } else {
            Some(connection)
        }
    }

    /// Detach everyone and stop for good.
    fn retire(&self, reason: DropReason) -> Option<Box<dyn Connection>> {
        let mut state = self.state.lock();
        Self::retire_locked(&mut state, reason)
    }

    /// Stop for good unless someone is observing. `None` if observed.
    fn retire_unobserved(&self) -> Option<Option<Box<dyn Connection>>> {
        let mut state = self.state.lock();
        if !state.observers.is_empty() {
            return None;
        }
        Some(Self::retire_locked(&mut state, DropReason::Stopped))
    }

    fn retire_locked(state: &mut QueryState, reason: DropReason) -> Option<Box<dyn Connection>> {
        if state.retired {
            return None;
        }
        state.retired = true;
        for (_, sender) in state.observers.drain(..) {
            let _ = sender.try_send(LiveEvent::Dropped {
                reason: reason.clone(),
            });
        }
        state.reducer.reset();
        state.halt()
    }

    /// Returns true if this removed the last observer.
    fn remove_observer(&self, id: ObserverId) -> bool {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|(oid, _)| *oid != id);
        before != state.observers.len() && state.observers.is_empty()
    }

    fn snapshot(&self) -> Arc<LiveSnapshot> {
        self.state.lock().snapshot(&self.key)
    }

    fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }
}

/// Shared internals of a [`LiveStore`].
pub(crate) struct StoreInner {
    transport: Arc<dyn Transport>,
    config: StoreConfig,
    queries: Mutex<HashMap<String, Arc<LiveQuery>>>,
    /// Unobserved subscriptions kept running, least recently idled first out.
    idle: Mutex<Option<LruCache<String, ()>>>,
    next_observer: AtomicU64,
    shut_down: AtomicBool,
}

impl StoreInner {
    fn open(self: &Arc<Self>, live: &Arc<LiveQuery>, generation: u64) {
        let sink = EventSink::new(Arc::downgrade(self), Arc::downgrade(live), generation);

        match self.transport.open(&live.query, sink) {
            Ok(connection) => {
                if let Some(mut stale) = live.install(generation, connection) {
                    debug!(key = %live.key, generation, "run ended while opening, closing");
                    stale.close();
                }
            }
            Err(e) => live.fail(generation, e),
        }
    }

    fn detach(&self, live: &Arc<LiveQuery>, id: ObserverId) {
        debug!(key = %live.key, observer = id.0, "observer detached");
        if live.remove_observer(id) {
            self.on_unobserved(live);
        }
    }

    /// Apply the teardown policy to a subscription that lost its last observer.
    pub(crate) fn on_unobserved(&self, live: &Arc<LiveQuery>) {
        let evicted = {
            let mut idle = self.idle.lock();
            match idle.as_mut() {
                None => match self.config.teardown {
                    TeardownPolicy::KeepAlive => return,
                    _ => Some(live.key.clone()),
                },
                Some(cache) => match cache.push(live.key.clone(), ()) {
                    Some((key, _)) if key != live.key => Some(key),
                    _ => None,
                },
            }
        };

        let Some(key) = evicted else {
            debug!(key = %live.key, "subscription idle");
            return;
        };

        let target = if key == live.key {
            Some(live.clone())
        } else {
            self.queries.lock().get(&key).cloned()
        };

        if let Some(target) = target {
            self.retire_if_unobserved(&target);
        }
    }

    fn retire_if_unobserved(&self, live: &Arc<LiveQuery>) {
        let connection = {
            let mut queries = self.queries.lock();
            let Some(connection) = live.retire_unobserved() else {
                return;
            };
            if queries.get(&live.key).map_or(false, |q| Arc::ptr_eq(q, live)) {
                queries.remove(&live.key);
            }
            connection
        };

        info!(key = %live.key, "subscription stopped");
        if let Some(mut connection) = connection {
            connection.close();
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let queries: Vec<_> = self.queries.lock().drain().map(|(_, q)| q).collect();
        if let Some(cache) = self.idle.lock().as_mut() {
            cache.clear();
        }

        for live in queries {
            if let Some(mut connection) = live.retire(DropReason::Shutdown) {
                connection.close();
            }
        }
        info!("live store shut down");
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registry of live subscriptions keyed by a logical name ("roles",
/// "clusters", ...).
///
/// The first observer of a key starts its subscription; the teardown policy
/// decides what happens after the last one leaves. Clones share the same
/// registry. The store shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct LiveStore {
    inner: Arc<StoreInner>,
}

impl LiveStore {
    /// Create a store over a transport.
    pub fn new<T>(transport: T, config: StoreConfig) -> Self
    where
        T: Transport + 'static,
    {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Create a store over a shared transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: StoreConfig) -> Self {
        let idle = match config.teardown {
            TeardownPolicy::KeepIdle { max_idle } => NonZeroUsize::new(max_idle).map(LruCache::new),
            _ => None,
        };

        Self {
            inner: Arc::new(StoreInner {
                transport,
                config,
                queries: Mutex::new(HashMap::new()),
                idle: Mutex::new(idle),
                next_observer: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Observe the subscription registered under `key`, starting it if needed.
    ///
    /// The observer immediately receives the current state. Errors from the
    /// transport are published on the state, not returned here.
    pub fn attach(&self, key: impl Into<String>, query: SubscribeQuery) -> Result<Observer> {
        let key = key.into();
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::SeqCst));
        // One slot past the state buffer is kept for the final `Dropped`.
        let (sender, receiver) = bounded(self.inner.config.observer_buffer.max(1) + 1);

        loop {
            if self.inner.shut_down.load(Ordering::SeqCst) {
                return Err(SubscribeError::Stopped);
            }

            let live = {
                let mut queries = self.inner.queries.lock();
                match queries.get(&key) {
                    Some(existing) => {
                        if existing.query != query {
                            return Err(SubscribeError::QueryMismatch(key));
                        }
                        existing.clone()
                    }
                    None => {
                        let live = Arc::new(LiveQuery::new(key.clone(), query.clone()));
                        queries.insert(key.clone(), live.clone());
                        live
                    }
                }
            };

            if let Some(cache) = self.inner.idle.lock().as_mut() {
                cache.pop(&key);
            }

            let start = {
                let mut state = live.state.lock();
                if state.retired {
                    // Retired between lookup and lock; register afresh.
                    continue;
                }

                let start = if !state.running && state.observers.is_empty() {
                    Some(state.start())
                } else {
                    None
                };

                let _ = sender.try_send(LiveEvent::State(state.snapshot(&live.key)));
                state.observers.push((id, sender.clone()));
                start
            };

            debug!(key = %live.key, observer = id.0, "observer attached");

            if let Some(generation) = start {
                info!(key = %live.key, generation, sql = %live.query.to_sql(), "starting subscription");
                self.inner.open(&live, generation);
            }

            return Ok(Observer {
                id,
                receiver,
                query: live,
                store: Arc::downgrade(&self.inner),
            });
        }
    }

    /// Stop the subscription under `key` and detach its observers.
    pub fn stop(&self, key: &str) -> Result<()> {
        let live = self
            .inner
            .queries
            .lock()
            .remove(key)
            .ok_or_else(|| SubscribeError::SubscriptionNotFound(key.to_string()))?;

        if let Some(cache) = self.inner.idle.lock().as_mut() {
            cache.pop(key);
        }

        info!(key, "stopping subscription");
        if let Some(mut connection) = live.retire(DropReason::Stopped) {
            connection.close();
        }
        Ok(())
    }

    /// Start the subscription under `key` over from an empty row set,
    /// keeping its observers.
    pub fn restart(&self, key: &str) -> Result<()> {
        let live = self
            .inner
            .queries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| SubscribeError::SubscriptionNotFound(key.to_string()))?;

        let (old, generation) = {
            let mut state = live.state.lock();
            if state.retired {
                return Err(SubscribeError::SubscriptionNotFound(key.to_string()));
            }
            let old = state.halt();
            let generation = state.start();
            state.publish(&live.key);
            (old, generation)
        };

        info!(key, generation, "restarting subscription");
        if let Some(mut connection) = old {
            connection.close();
        }
        self.inner.open(&live, generation);
        Ok(())
    }

    /// Current state of the subscription under `key`.
    pub fn snapshot(&self, key: &str) -> Option<Arc<LiveSnapshot>> {
        let live = self.inner.queries.lock().get(key).cloned()?;
        Some(live.snapshot())
    }

    /// Registered subscriptions, observed or idle.
    pub fn subscription_count(&self) -> usize {
        self.inner.queries.lock().len()
    }

    pub fn observer_count(&self, key: &str) -> usize {
        let live = self.inner.queries.lock().get(key).cloned();
        live.map_or(0, |live| live.observer_count())
    }

    /// Keys of unobserved subscriptions kept running, most recently idled first.
    pub fn idle_keys(&self) -> Vec<String> {
        match self.inner.idle.lock().as_ref() {
            Some(cache) => cache.iter().map(|(k, _)| k.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Stop every subscription and refuse new observers.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// An attached observer. Dropping it detaches.
pub struct Observer {
    id: ObserverId,
    receiver: Receiver<LiveEvent>,
    query: Arc<LiveQuery>,
    store: Weak<StoreInner>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Logical key of the observed subscription.
    pub fn key(&self) -> &str {
        &self.query.key
    }

    /// The subscription's state right now.
    pub fn current(&self) -> Arc<LiveSnapshot> {
        self.query.snapshot()
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<LiveEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<LiveEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<LiveEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain queued events and return the newest published state, if any.
    pub fn latest(&self) -> Option<Arc<LiveSnapshot>> {
        let mut latest = None;
        while let Ok(event) = self.receiver.try_recv() {
            if let LiveEvent::State(snapshot) = event {
                latest = Some(snapshot);
            }
        }
        latest
    }

    /// Detach explicitly.
    pub fn detach(self) {}
}

impl Drop for Observer {
    fn drop(&mut self) {
        match self.store.upgrade() {
            Some(store) => store.detach(&self.query, self.id),
            None => {
                self.query.remove_observer(self.id);
            }
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("key", &self.query.key)
            .finish()
    }
}
