//! Upsert keys and the row keys derived from them.

use crate::error::{Result, SubscribeError};
use crate::types::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fields that identify a row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct UpsertKey {
    fields: Vec<String>,
}

impl UpsertKey {
    /// Build a key from one or more field names.
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();

        if fields.is_empty() {
            return Err(SubscribeError::InvalidKey(
                "at least one key field is required".to_string(),
            ));
        }

        for (i, field) in fields.iter().enumerate() {
            if field.is_empty() {
                return Err(SubscribeError::InvalidKey("empty field name".to_string()));
            }
            if fields[..i].contains(field) {
                return Err(SubscribeError::InvalidKey(format!(
                    "duplicate field `{}`",
                    field
                )));
            }
        }

        Ok(Self { fields })
    }

    /// Key on a single field.
    pub fn single(field: impl Into<String>) -> Result<Self> {
        let field: String = field.into();
        Self::new([field])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Derive the key of a row.
    ///
    /// `null` is a legal key value; an absent field is not.
    pub fn extract(&self, row: &Row) -> Result<RowKey> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = row.get(field).ok_or_else(|| SubscribeError::MissingKeyField {
                field: field.clone(),
                row: Value::Object(row.clone()).to_string(),
            })?;
            values.push(value);
        }
        Ok(RowKey::from_values(values))
    }
}

impl TryFrom<Vec<String>> for UpsertKey {
    type Error = SubscribeError;

    fn try_from(fields: Vec<String>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<UpsertKey> for Vec<String> {
    fn from(key: UpsertKey) -> Self {
        key.fields
    }
}

/// Canonical key of a row: the JSON rendering of each key field, in key order.
///
/// Equality and hashing use the rendering. Ordering follows the values:
/// `null`, booleans, numbers (numerically), strings, arrays, objects.
#[derive(Clone)]
pub struct RowKey {
    parts: Vec<String>,
    values: Vec<Value>,
}

impl RowKey {
    /// Key from the values of its fields, in key order.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let values: Vec<Value> = values.into_iter().cloned().collect();
        let parts = values.iter().map(|v| v.to_string()).collect();
        RowKey { parts, values }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, a_text), (b, b_text)) in self
            .values
            .iter()
            .zip(&self.parts)
            .zip(other.values.iter().zip(&other.parts))
        {
            // Ties on value (1 vs 1.0) fall back to the rendering so the
            // order stays consistent with `Eq`.
            let ord = compare_values(a, b).then_with(|| a_text.cmp(b_text));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.parts.len().cmp(&other.parts.len())
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                a.cmp(&b)
            } else if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                a.cmp(&b)
            } else {
                let a = a.as_f64().unwrap_or(f64::NAN);
                let b = b.as_f64().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({})", self.parts.join(", "))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.parts.join(", "))
    }
}
