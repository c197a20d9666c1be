//! Upsert reduction of change feeds.
//!
//! A change feed is folded into a [`RowSet`] keyed by an [`UpsertKey`]:
//! inserts overwrite the entry for their key, deletes remove it. Events are
//! applied strictly in delivery order.

mod key;
mod reducer;

pub use key::{RowKey, UpsertKey};
pub use reducer::{Applied, RowSet, UpsertReducer};
