//! Core data types used throughout the sysdelta library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Field values**: [`FieldValue`], [`FieldMap`] - the typed, free-form attributes a
//!   collector records for one resource
//! - **Snapshots**: [`Session`], [`Item`] - one collection cycle and one resource within it
//! - **Output**: [`Report`] - the persisted result of a diff cycle
//!
//! ## Examples
//!
//! ```rust
//! use sysdelta::types::{FieldValue, Item};
//!
//! let mut item = Item::new("session-id", "file:///etc/hosts", "file");
//! item.set("size", 158i64);
//! item.set("mode", "u=rw-,g=r--,o=r--");
//! assert_eq!(item.get("size"), Some(&FieldValue::Integer(158)));
//! ```

use crate::error::{MonitorError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field marking an item whose fields were carried forward without re-collection
pub const ASSUME_UNCHANGED: &str = "assume_nochange";

/// Field recording a resource-level collection failure
pub const COLLECT_ERROR: &str = "collect_error";

/// Bookkeeping fields that never take part in a diff
pub const BOOKKEEPING_FIELDS: [&str; 5] = ["id", "sessionid", "url", "uuid", ASSUME_UNCHANGED];

/// A single typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// UTF-8 text
    Text(String),
    /// Signed integer
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Point in time (UTC)
    Timestamp(DateTime<Utc>),
    /// Flag
    Boolean(bool),
    /// Raw bytes, e.g. file content
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Stable storage tag of this variant
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Bytes(_) => "bytes",
        }
    }

    /// Whether this value holds raw bytes
    pub fn is_bytes(&self) -> bool {
        matches!(self, FieldValue::Bytes(_))
    }

    /// Text view of the value; bytes are decoded as UTF-8 with replacement
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => other.to_string(),
        }
    }

    /// Borrow the text of a `Text` value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if any
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Timestamp payload, if any
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Encode for storage as `(kind, value)` columns
    pub(crate) fn encode(&self) -> (&'static str, rusqlite::types::Value) {
        use rusqlite::types::Value;
        let value = match self {
            FieldValue::Text(s) => Value::Text(s.clone()),
            FieldValue::Integer(i) => Value::Integer(*i),
            FieldValue::Float(f) => Value::Real(*f),
            FieldValue::Timestamp(t) => Value::Text(format_timestamp(t)),
            FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
            FieldValue::Bytes(b) => Value::Blob(b.clone()),
        };
        (self.kind(), value)
    }

    /// Decode from the `(kind, value)` columns written by [`FieldValue::encode`]
    pub(crate) fn decode(kind: &str, value: rusqlite::types::Value) -> Result<Self> {
        use rusqlite::types::Value;
        Ok(match (kind, value) {
            ("text", Value::Text(s)) => FieldValue::Text(s),
            ("integer", Value::Integer(i)) => FieldValue::Integer(i),
            ("float", Value::Real(f)) => FieldValue::Float(f),
            ("float", Value::Integer(i)) => FieldValue::Float(i as f64),
            ("timestamp", Value::Text(s)) => FieldValue::Timestamp(parse_timestamp(&s)?),
            ("boolean", Value::Integer(i)) => FieldValue::Boolean(i != 0),
            ("bytes", Value::Blob(b)) => FieldValue::Bytes(b),
            ("bytes", Value::Null) => FieldValue::Bytes(Vec::new()),
            (kind, value) => {
                return Err(MonitorError::Corrupt(format!(
                    "field of kind '{}' holds {:?}",
                    kind,
                    value.data_type()
                )))
            }
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Timestamp(t) => f.write_str(&format_timestamp(t)),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

/// Ordered map of field name to value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// One collection cycle's snapshot
///
/// A session is open while a collection pass runs and is marked closed when
/// the pass completes. Closed sessions are never modified again; sessions left
/// open by an interrupted pass are deleted by the next retention pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique key (UUID v4)
    pub id: String,
    /// Creation timestamp, used for ordering
    pub stamp: DateTime<Utc>,
    /// Whether the collection pass completed
    pub closed: bool,
    /// When collection started
    pub start_time: DateTime<Utc>,
    /// When collection finished
    pub end_time: Option<DateTime<Utc>>,
    /// Host the session was collected on
    pub hostname: Option<String>,
    /// Number of items recorded
    pub item_count: u64,
}

impl Session {
    /// Create a new open session stamped now
    pub fn open() -> Self {
        let stamp = now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stamp,
            closed: false,
            start_time: stamp,
            end_time: None,
            hostname: None,
            item_count: 0,
        }
    }

    /// Mark the session closed
    pub fn close(&mut self, item_count: u64) {
        self.closed = true;
        self.end_time = Some(now());
        self.item_count = item_count;
    }
}

/// One resource's recorded state within a session
///
/// `(url, session_id)` is the natural key: a session holds at most one item
/// per resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Owning session
    pub session_id: String,
    /// Resource identifier (`scheme://...`)
    pub url: String,
    /// Label of the collector that owns the resource
    pub plugin: String,
    /// Recorded attributes
    pub fields: FieldMap,
}

impl Item {
    /// Create an item with no fields
    pub fn new(session_id: impl Into<String>, url: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            url: url.into(),
            plugin: plugin.into(),
            fields: FieldMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Look up a field
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// URL scheme (the part before `://`)
    pub fn scheme(&self) -> Option<&str> {
        url_scheme(&self.url)
    }

    /// Whether the item was carried forward by the assume-unchanged shortcut
    pub fn is_assumed_unchanged(&self) -> bool {
        matches!(self.get(ASSUME_UNCHANGED), Some(FieldValue::Boolean(true)))
    }
}

/// Rendered output of one diff cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Unique key (UUID v4)
    pub id: String,
    /// Creation timestamp
    pub stamp: DateTime<Utc>,
    /// Plain text body
    pub text: String,
    /// HTML body
    pub html: String,
    /// True iff the diff found no differences
    pub is_empty: bool,
    /// Host of the newer session
    pub hostname: Option<String>,
}

impl Report {
    /// Create a report stamped now
    pub fn new(text: String, html: String, is_empty: bool, hostname: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stamp: now(),
            text,
            html,
            is_empty,
            hostname,
        }
    }
}

/// Scheme of a `scheme://rest` resource URL
///
/// Returns `None` when the URL has no `://` separator or an empty/invalid
/// scheme.
pub fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        Some(scheme)
    } else {
        None
    }
}

/// Part of a URL after `scheme://`
pub fn url_path(url: &str) -> &str {
    url.split_once("://").map_or(url, |(_, rest)| rest)
}

/// Current time at the precision timestamps are stored with
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Storage/display format for timestamps (RFC 3339, microseconds, `Z`)
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`]
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MonitorError::Corrupt(format!("invalid timestamp {:?}: {}", s, e)))
}
