//! # Live Tables
//!
//! Materialized, observable row sets fed by streaming SQL `SUBSCRIBE` queries.
//!
//! ## Core Concepts
//!
//! - **Change events**: inserts and deletes with a row payload, plus progress
//!   and snapshot-complete markers
//! - **Upsert reduction**: events fold into one row per upsert key, in arrival order
//! - **Live store**: one subscription per logical key, published to any number
//!   of observers with explicit teardown
//! - **Protocol**: decoding of SQL-over-WebSocket `SUBSCRIBE` output
//!
//! ## Example
//!
//! ```ignore
//! use livetable::{LiveStore, StoreConfig, SubscribeQuery};
//!
//! let store = LiveStore::new(transport, StoreConfig::default());
//!
//! let roles = store.attach(
//!     "roles",
//!     SubscribeQuery::new("SELECT id, name FROM mz_roles", ["id"])?,
//! )?;
//!
//! let snapshot = roles.current();
//! if !snapshot.is_loading() {
//!     for role in snapshot.to_vec() {
//!         println!("{}", role["name"]);
//!     }
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod query;
pub mod subscriptions;
pub mod types;
pub mod upsert;

// Re-exports
pub use error::{Result, SubscribeError};
pub use protocol::{DecodingSink, SubscribeDecoder, WebSocketMessage};
pub use query::{Envelope, SubscribeQuery};
pub use subscriptions::{
    Connection, DropReason, EventSink, LiveEvent, LiveSnapshot, LiveStore, Observer, ObserverId,
    StoreConfig, TeardownPolicy, Transport,
};
pub use types::*;
pub use upsert::{Applied, RowKey, RowSet, UpsertKey, UpsertReducer};
