//! Decoding `SUBSCRIBE` output into change events.

use super::messages::{Column, WebSocketMessage};
use crate::error::{Result, SubscribeError};
use crate::types::{ChangeEvent, Diff, Row, Timestamp};
use serde_json::Value;

const TIMESTAMP_COLUMN: &str = "mz_timestamp";
const PROGRESSED_COLUMN: &str = "mz_progressed";
const DIFF_COLUMN: &str = "mz_diff";
const STATE_COLUMN: &str = "mz_state";

/// Where the change polarity lives in a row.
#[derive(Clone, Copy, Debug)]
enum ChangeColumn {
    Diff(usize),
    State(usize),
}

/// Column positions of a subscription's output.
#[derive(Clone, Debug)]
struct Layout {
    arity: usize,
    timestamp: usize,
    progressed: Option<usize>,
    change: ChangeColumn,
    data: Vec<(usize, String)>,
}

impl Layout {
    fn from_columns(columns: &[Column]) -> Result<Self> {
        let position = |name: &str| columns.iter().position(|c| c.name() == name);

        let timestamp = position(TIMESTAMP_COLUMN).ok_or_else(|| {
            SubscribeError::Protocol(format!("subscribe output has no `{}` column", TIMESTAMP_COLUMN))
        })?;
        let progressed = position(PROGRESSED_COLUMN);
        let change = match (position(DIFF_COLUMN), position(STATE_COLUMN)) {
            (Some(i), None) => ChangeColumn::Diff(i),
            (None, Some(i)) => ChangeColumn::State(i),
            (Some(_), Some(_)) => {
                return Err(SubscribeError::Protocol(format!(
                    "subscribe output has both `{}` and `{}`",
                    DIFF_COLUMN, STATE_COLUMN
                )))
            }
            (None, None) => {
                return Err(SubscribeError::Protocol(format!(
                    "subscribe output has neither `{}` nor `{}`",
                    DIFF_COLUMN, STATE_COLUMN
                )))
            }
        };

        let data = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                !matches!(
                    c.name(),
                    TIMESTAMP_COLUMN | PROGRESSED_COLUMN | DIFF_COLUMN | STATE_COLUMN
                )
            })
            .map(|(i, c)| (i, c.name().to_string()))
            .collect();

        Ok(Self {
            arity: columns.len(),
            timestamp,
            progressed,
            change,
            data,
        })
    }

    /// Upsert output without progress rows: nothing would ever close the
    /// latest timestamp, and one row per key per timestamp needs no reordering.
    fn streams_updates(&self) -> bool {
        self.progressed.is_none() && matches!(self.change, ChangeColumn::State(_))
    }
}

/// A decoded output row before it is applied to decoder state.
enum Decoded {
    Progress(Timestamp),
    Update(Timestamp, Option<Diff>, Row),
}

/// Turns SQL WebSocket frames of a `SUBSCRIBE` into ordered change events.
///
/// Updates are held back until their timestamp closes, then emitted with
/// deletes ahead of inserts, so that a diff-envelope update (retract the old
/// row, assert the new one) leaves the new row in place. Upsert output
/// without progress rows is the exception: once the snapshot is complete,
/// its updates are emitted as they arrive.
#[derive(Debug, Default)]
pub struct SubscribeDecoder {
    layout: Option<Layout>,
    pending_ts: Option<Timestamp>,
    pending: Vec<(Diff, Row)>,
    snapshot_complete: bool,
    finished: bool,
}

impl SubscribeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `SnapshotComplete` has been emitted.
    pub fn snapshot_complete(&self) -> bool {
        self.snapshot_complete
    }

    /// Whether the server reported the end of the `SUBSCRIBE`.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Number of updates waiting for their timestamp to close.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode one text frame.
    pub fn decode(&mut self, text: &str) -> Result<Vec<ChangeEvent>> {
        let message = WebSocketMessage::parse(text)?;
        self.decode_message(message)
    }

    /// Decode one parsed message.
    pub fn decode_message(&mut self, message: WebSocketMessage) -> Result<Vec<ChangeEvent>> {
        let mut out = Vec::new();

        match message {
            WebSocketMessage::Rows { columns } => {
                self.layout = Some(Layout::from_columns(&columns)?);
                self.pending_ts = None;
                self.pending.clear();
                self.snapshot_complete = false;
                self.finished = false;
            }
            WebSocketMessage::Row(values) => match self.decode_row(values)? {
                Decoded::Progress(ts) => {
                    if self.pending_ts.map_or(false, |p| p < ts) {
                        self.flush(&mut out);
                    }
                    if self.pending.is_empty() && !self.snapshot_complete {
                        self.snapshot_complete = true;
                        out.push(ChangeEvent::SnapshotComplete);
                    }
                    out.push(ChangeEvent::Progress { timestamp: ts });
                }
                Decoded::Update(ts, diff, row) => {
                    if let Some(p) = self.pending_ts {
                        if ts < p {
                            return Err(SubscribeError::Protocol(format!(
                                "timestamp went backwards: {} after {}",
                                ts, p
                            )));
                        }
                        if ts > p {
                            self.flush(&mut out);
                            if !self.snapshot_complete {
                                self.snapshot_complete = true;
                                out.push(ChangeEvent::SnapshotComplete);
                            }
                        }
                    }
                    self.pending_ts = Some(ts);
                    let Some(diff) = diff else {
                        return Ok(out);
                    };
                    let streaming = self.snapshot_complete
                        && self.layout.as_ref().map_or(false, Layout::streams_updates);
                    if streaming {
                        out.push(ChangeEvent::Update {
                            diff,
                            row,
                            timestamp: Some(ts),
                        });
                    } else {
                        self.pending.push((diff, row));
                    }
                }
            },
            WebSocketMessage::CommandComplete(_) => {
                self.flush(&mut out);
                if self.layout.is_some() && !self.snapshot_complete {
                    self.snapshot_complete = true;
                    out.push(ChangeEvent::SnapshotComplete);
                }
                self.finished = true;
            }
            WebSocketMessage::Error { message, code } => {
                return Err(SubscribeError::Server { message, code })
            }
            WebSocketMessage::CommandStarting { .. }
            | WebSocketMessage::Notice { .. }
            | WebSocketMessage::ReadyForQuery
            | WebSocketMessage::Other(_) => {}
        }

        Ok(out)
    }

    fn decode_row(&self, values: Vec<Value>) -> Result<Decoded> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| SubscribeError::Protocol("Row received before Rows".to_string()))?;

        if values.len() != layout.arity {
            return Err(SubscribeError::Protocol(format!(
                "expected {} columns, got {}",
                layout.arity,
                values.len()
            )));
        }

        let ts = parse_timestamp(&values[layout.timestamp])?;

        if let Some(i) = layout.progressed {
            if parse_bool(&values[i])? {
                return Ok(Decoded::Progress(ts));
            }
        }

        let mut row = Row::new();
        for (i, name) in &layout.data {
            row.insert(name.clone(), values[*i].clone());
        }

        let diff = match layout.change {
            ChangeColumn::Diff(i) => Diff::from_multiplicity(parse_i64(&values[i])?),
            ChangeColumn::State(i) => match values[i].as_str() {
                Some("upsert") => Some(Diff::Insert),
                Some("delete") => Some(Diff::Delete),
                Some("key_violation") => {
                    return Err(SubscribeError::KeyViolation(Value::Object(row).to_string()))
                }
                _ => {
                    return Err(SubscribeError::Protocol(format!(
                        "unknown `{}` value {}",
                        STATE_COLUMN, values[i]
                    )))
                }
            },
        };

        Ok(Decoded::Update(ts, diff, row))
    }

    fn flush(&mut self, out: &mut Vec<ChangeEvent>) {
        let Some(ts) = self.pending_ts else {
            return;
        };
        let pending = std::mem::take(&mut self.pending);
        let (deletes, inserts): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(diff, _)| *diff == Diff::Delete);

        out.extend(deletes.into_iter().chain(inserts).map(|(diff, row)| ChangeEvent::Update {
            diff,
            row,
            timestamp: Some(ts),
        }));
    }
}

fn parse_timestamp(value: &Value) -> Result<Timestamp> {
    let ts = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    ts.map(Timestamp)
        .ok_or_else(|| SubscribeError::Protocol(format!("invalid timestamp {}", value)))
}

fn parse_i64(value: &Value) -> Result<i64> {
    let n = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    n.ok_or_else(|| SubscribeError::Protocol(format!("invalid diff {}", value)))
}

fn parse_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::String(s) if s == "t" || s == "true" => Ok(true),
        Value::String(s) if s == "f" || s == "false" => Ok(false),
        other => Err(SubscribeError::Protocol(format!("invalid progressed flag {}", other))),
    }
}
