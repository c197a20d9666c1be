//! Error types for live subscriptions.

use thiserror::Error;

/// Main error type for subscription operations.
///
/// Errors are `Clone` because they are stored on published snapshots and
/// handed to every observer.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SubscribeError {
    #[error("Invalid upsert key: {0}")]
    InvalidKey(String),

    #[error("Row is missing upsert key field `{field}`: {row}")]
    MissingKeyField { field: String, row: String },

    #[error("Upsert key violation: {0}")]
    KeyViolation(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error{}: {message}", code_suffix(.code))]
    Server {
        message: String,
        code: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Subscription `{0}` is already registered with a different query")]
    QueryMismatch(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Store is shut down")]
    Stopped,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl From<serde_json::Error> for SubscribeError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SubscribeError::Deserialization(e.to_string())
        } else {
            SubscribeError::Serialization(e.to_string())
        }
    }
}

/// Result type for subscription operations.
pub type Result<T> = std::result::Result<T, SubscribeError>;
