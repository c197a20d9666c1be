//! SQL-over-WebSocket server messages.

use crate::error::{Result, SubscribeError};
use serde::Deserialize;
use serde_json::Value;

/// A column description from a `Rows` message.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Described {
        name: String,
        #[serde(default)]
        type_oid: Option<u32>,
    },
    Named(String),
}

impl Column {
    pub fn name(&self) -> &str {
        match self {
            Column::Described { name, .. } => name,
            Column::Named(name) => name,
        }
    }
}

/// A message sent by the server on a SQL WebSocket.
#[derive(Clone, Debug, PartialEq)]
pub enum WebSocketMessage {
    CommandStarting { has_rows: bool, is_streaming: bool },
    /// Column layout for the following `Row` messages.
    Rows { columns: Vec<Column> },
    Row(Vec<Value>),
    CommandComplete(String),
    Error { message: String, code: Option<String> },
    Notice { message: String },
    ReadyForQuery,
    /// Any message type without meaning for subscriptions.
    Other(String),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct CommandStartingPayload {
    #[serde(default)]
    has_rows: bool,
    #[serde(default)]
    is_streaming: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RowsPayload {
    Described { columns: Vec<Column> },
    Bare(Vec<Column>),
}

#[derive(Deserialize)]
struct NoticePayload {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl WebSocketMessage {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;

        let message = match raw.kind.as_str() {
            "CommandStarting" => {
                let p: CommandStartingPayload = serde_json::from_value(raw.payload)?;
                WebSocketMessage::CommandStarting {
                    has_rows: p.has_rows,
                    is_streaming: p.is_streaming,
                }
            }
            "Rows" => {
                let payload: RowsPayload = serde_json::from_value(raw.payload)?;
                let columns = match payload {
                    RowsPayload::Described { columns } => columns,
                    RowsPayload::Bare(columns) => columns,
                };
                WebSocketMessage::Rows { columns }
            }
            "Row" => match raw.payload {
                Value::Array(values) => WebSocketMessage::Row(values),
                other => {
                    return Err(SubscribeError::Protocol(format!(
                        "Row payload is not an array: {}",
                        other
                    )))
                }
            },
            "CommandComplete" => WebSocketMessage::CommandComplete(match raw.payload {
                Value::String(tag) => tag,
                other => other.to_string(),
            }),
            "Error" => match raw.payload {
                Value::String(message) => WebSocketMessage::Error {
                    message,
                    code: None,
                },
                payload => {
                    let p: NoticePayload = serde_json::from_value(payload)?;
                    WebSocketMessage::Error {
                        message: p.message,
                        code: p.code,
                    }
                }
            },
            "Notice" => {
                let p: NoticePayload = serde_json::from_value(raw.payload)?;
                WebSocketMessage::Notice { message: p.message }
            }
            "ReadyForQuery" => WebSocketMessage::ReadyForQuery,
            _ => WebSocketMessage::Other(raw.kind),
        };

        Ok(message)
    }
}
