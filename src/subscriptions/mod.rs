//! Live subscriptions shared by observers.
//!
//! A [`LiveStore`] keeps one streaming subscription per logical key and
//! folds its change events into an upsert row set:
//! - The first observer of a key starts the subscription
//! - Every change publishes a new [`LiveSnapshot`] to all observers
//! - What happens after the last observer leaves is a [`TeardownPolicy`]
//! - Transport failures show up as the snapshot's `error`, never as panics
//!
//! # Example
//!
//! ```ignore
//! let store = LiveStore::new(my_transport, StoreConfig::default());
//!
//! let query = SubscribeQuery::new("SELECT id, name FROM mz_roles", ["id"])?;
//! let observer = store.attach("roles", query)?;
//!
//! loop {
//!     match observer.recv() {
//!         Ok(LiveEvent::State(snapshot)) if snapshot.is_loading() => println!("loading..."),
//!         Ok(LiveEvent::State(snapshot)) => println!("{} roles", snapshot.len()),
//!         Ok(LiveEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod transport;
mod types;

pub use manager::{LiveStore, Observer};
pub use transport::{Connection, EventSink, Transport};
pub use types::{DropReason, LiveEvent, LiveSnapshot, ObserverId, StoreConfig, TeardownPolicy};
