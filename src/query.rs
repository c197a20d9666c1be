//! `SUBSCRIBE` statements.

use crate::error::Result;
use crate::types::Timestamp;
use crate::upsert::UpsertKey;
use serde::{Deserialize, Serialize};

/// Output envelope of a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    /// `mz_diff` column with signed multiplicities.
    Diff,
    /// `mz_state` column (`upsert` / `delete` / `key_violation`).
    #[default]
    Upsert,
}

/// A query to keep live, plus how to key its rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscribeQuery {
    /// The `SELECT` (or relation name) to subscribe to.
    pub select: String,

    /// Fields identifying a row.
    pub upsert_key: UpsertKey,

    /// Emit progress rows (`WITH (PROGRESS)`).
    /// Default: true
    pub progress: bool,

    /// Emit the initial snapshot.
    /// Default: true
    pub snapshot: bool,

    /// Output envelope.
    pub envelope: Envelope,

    /// Start from a fixed timestamp.
    pub as_of: Option<Timestamp>,
}

impl SubscribeQuery {
    /// Subscribe to `select`, keyed by `fields`.
    pub fn new<I, S>(select: impl Into<String>, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            select: select.into(),
            upsert_key: UpsertKey::new(fields)?,
            progress: true,
            snapshot: true,
            envelope: Envelope::default(),
            as_of: None,
        })
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn as_of(mut self, ts: Timestamp) -> Self {
        self.as_of = Some(ts);
        self
    }

    /// Render the `SUBSCRIBE` statement.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SUBSCRIBE ({})", self.select.trim().trim_end_matches(';'));

        let mut options = Vec::new();
        if self.progress {
            options.push("PROGRESS".to_string());
        }
        if !self.snapshot {
            options.push("SNAPSHOT = false".to_string());
        }
        if !options.is_empty() {
            sql.push_str(&format!(" WITH ({})", options.join(", ")));
        }

        if let Some(ts) = self.as_of {
            sql.push_str(&format!(" AS OF {}", ts));
        }

        if self.envelope == Envelope::Upsert {
            let columns: Vec<String> = self
                .upsert_key
                .fields()
                .iter()
                .map(|f| quote_ident(f))
                .collect();
            sql.push_str(&format!(" ENVELOPE UPSERT (KEY ({}))", columns.join(", ")));
        }

        sql
    }

    /// Render the SQL-over-WebSocket request body.
    pub fn to_request(&self) -> Result<String> {
        let request = SqlRequest {
            queries: vec![SqlQuery {
                query: self.to_sql(),
                params: Vec::new(),
            }],
        };
        Ok(serde_json::to_string(&request)?)
    }
}

#[derive(Serialize)]
struct SqlRequest {
    queries: Vec<SqlQuery>,
}

#[derive(Serialize)]
struct SqlQuery {
    query: String,
    params: Vec<Option<String>>,
}

/// Quote an identifier unless it is a plain lowercase one.
pub fn quote_ident(ident: &str) -> String {
    let plain = ident
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c == '_')
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sql() {
        let q = SubscribeQuery::new("SELECT id, name FROM mz_roles", ["id"]).unwrap();
        assert_eq!(
            q.to_sql(),
            "SUBSCRIBE (SELECT id, name FROM mz_roles) WITH (PROGRESS) ENVELOPE UPSERT (KEY (id))"
        );
    }

    #[test]
    fn test_diff_envelope_without_snapshot() {
        let q = SubscribeQuery::new("SELECT * FROM t;", ["id"])
            .unwrap()
            .with_envelope(Envelope::Diff)
            .with_progress(false)
            .with_snapshot(false)
            .as_of(Timestamp(42));
        assert_eq!(
            q.to_sql(),
            "SUBSCRIBE (SELECT * FROM t) WITH (SNAPSHOT = false) AS OF 42"
        );
    }

    #[test]
    fn test_composite_key_quoting() {
        let q = SubscribeQuery::new("SELECT * FROM replicas", ["cluster_id", "Name"]).unwrap();
        assert!(q
            .to_sql()
            .ends_with("ENVELOPE UPSERT (KEY (cluster_id, \"Name\"))"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("id"), "id");
        assert_eq!(quote_ident("_x1"), "_x1");
        assert_eq!(quote_ident("1x"), "\"1x\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_request_body() {
        let q = SubscribeQuery::new("SELECT 1 AS id", ["id"]).unwrap();
        let body: serde_json::Value = serde_json::from_str(&q.to_request().unwrap()).unwrap();
        assert_eq!(body["queries"][0]["query"], q.to_sql());
        assert_eq!(body["queries"][0]["params"], serde_json::json!([]));
    }
}
