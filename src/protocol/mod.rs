//! SQL-over-WebSocket framing for `SUBSCRIBE`.

mod decoder;
mod messages;
mod sink;

pub use decoder::SubscribeDecoder;
pub use messages::{Column, WebSocketMessage};
pub use sink::DecodingSink;
