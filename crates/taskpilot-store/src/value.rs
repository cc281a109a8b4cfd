//! Plain (untracked) document values and their JSON encoding.
//!
//! `Plain` is the closed set of values a document may hold: JSON scalars,
//! UTC timestamps, string-keyed maps, and sequences. Timestamps survive the
//! round trip to disk through a tagged object:
//!
//! ```json
//! {"__datetime__": true, "value": "2024-05-01T08:30:00.000000Z"}
//! ```
//!
//! The tag registry is closed and decoded by an explicit switch; any other
//! `__tag__`-shaped object is rejected with [`StoreError::Codec`] instead of
//! being resolved dynamically.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Tag key marking a persisted timestamp object.
pub const DATETIME_TAG: &str = "__datetime__";

/// An untracked document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Plain {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    Map(BTreeMap<String, Plain>),
    Seq(Vec<Plain>),
}

impl Plain {
    /// Empty map value.
    pub fn empty_map() -> Self {
        Plain::Map(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Plain::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Plain::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Plain::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Plain::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Plain>> {
        match self {
            Plain::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Plain]> {
        match self {
            Plain::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Plain::Null)
    }
}

impl From<bool> for Plain {
    fn from(v: bool) -> Self {
        Plain::Bool(v)
    }
}

impl From<i64> for Plain {
    fn from(v: i64) -> Self {
        Plain::Int(v)
    }
}

impl From<i32> for Plain {
    fn from(v: i32) -> Self {
        Plain::Int(v as i64)
    }
}

impl From<u32> for Plain {
    fn from(v: u32) -> Self {
        Plain::Int(v as i64)
    }
}

impl From<f64> for Plain {
    fn from(v: f64) -> Self {
        Plain::Float(v)
    }
}

impl From<&str> for Plain {
    fn from(v: &str) -> Self {
        Plain::Str(v.to_string())
    }
}

impl From<String> for Plain {
    fn from(v: String) -> Self {
        Plain::Str(v)
    }
}

impl From<DateTime<Utc>> for Plain {
    fn from(v: DateTime<Utc>) -> Self {
        Plain::Timestamp(v)
    }
}

impl From<Vec<Plain>> for Plain {
    fn from(v: Vec<Plain>) -> Self {
        Plain::Seq(v)
    }
}

impl From<BTreeMap<String, Plain>> for Plain {
    fn from(v: BTreeMap<String, Plain>) -> Self {
        Plain::Map(v)
    }
}

/// `None` encodes as `Null`, mirroring how deadline fields are cleared.
impl<T: Into<Plain>> From<Option<T>> for Plain {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Plain::Null,
        }
    }
}

/// Encode a value for persistence.
pub fn to_json(value: &Plain) -> Value {
    match value {
        Plain::Null => Value::Null,
        Plain::Bool(b) => Value::Bool(*b),
        Plain::Int(i) => Value::from(*i),
        Plain::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Plain::Str(s) => Value::String(s.clone()),
        Plain::Timestamp(t) => serde_json::json!({
            DATETIME_TAG: true,
            "value": t.to_rfc3339_opts(SecondsFormat::Micros, true),
        }),
        Plain::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        Plain::Seq(items) => Value::Array(items.iter().map(to_json).collect()),
    }
}

/// Decode a persisted value.
pub fn from_json(value: &Value) -> Result<Plain> {
    Ok(match value {
        Value::Null => Plain::Null,
        Value::Bool(b) => Plain::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Plain::Int(i),
            None => Plain::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Plain::Str(s.clone()),
        Value::Array(items) => Plain::Seq(items.iter().map(from_json).collect::<Result<_>>()?),
        Value::Object(obj) => {
            if obj.get(DATETIME_TAG).and_then(Value::as_bool) == Some(true) {
                let raw = obj.get("value").and_then(Value::as_str).ok_or_else(|| {
                    StoreError::Codec("datetime tag without a string value".into())
                })?;
                return Ok(Plain::Timestamp(parse_timestamp(raw)?));
            }
            // Closed tag registry: anything else tag-shaped is not ours.
            if let Some(tag) = obj.keys().find(|k| k.starts_with("__") && k.ends_with("__")) {
                return Err(StoreError::Codec(format!("unknown type tag {tag:?}")));
            }
            Plain::Map(
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), from_json(v)?)))
                    .collect::<Result<_>>()?,
            )
        }
    })
}

/// Accepts both RFC 3339 and the offset-less ISO form older documents carry.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Codec(format!("invalid datetime {raw:?}: {e}")))
}
