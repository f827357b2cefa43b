//! Replication state: the resumable position of every stream.
//!
//! State values are immutable snapshots. Every mutation consumes a snapshot
//! and returns the next one, which is what gets checkpointed.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::Catalog;
use crate::provider::RowValue;
use crate::{Error, Result};

/// A replication key value as persisted in a bookmark.
///
/// Non-integer numbers keep their exact decimal text so that a resumed
/// extraction compares against the same value that was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum CursorValue {
    Integer(i64),
    Number(serde_json::Number),
    Text(String),
}

impl CursorValue {
    /// Converts an emitted record value into a cursor. Nulls and non-scalar
    /// values cannot order rows and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(CursorValue::Integer(i)),
                None => Some(CursorValue::Number(n.clone())),
            },
            serde_json::Value::String(s) => Some(CursorValue::Text(s.clone())),
            _ => None,
        }
    }

    /// The query parameter for this cursor. Date-time columns bind a parsed
    /// timestamp rather than the persisted string.
    pub fn to_param(&self, is_date_time: bool) -> Result<RowValue> {
        match self {
            CursorValue::Integer(i) => Ok(RowValue::Integer(*i)),
            CursorValue::Number(n) => Ok(RowValue::Numeric(n.to_string())),
            CursorValue::Text(s) if is_date_time => DateTime::<FixedOffset>::parse_from_rfc3339(s)
                .map(RowValue::TimestampTz)
                .map_err(|e| Error::Conversion {
                    message: format!("Invalid date-time replication key value '{}': {}", s, e),
                }),
            CursorValue::Text(s) => Ok(RowValue::Text(s.clone())),
        }
    }
}

impl TryFrom<serde_json::Value> for CursorValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        CursorValue::from_json(&value)
            .ok_or_else(|| format!("replication_key_value must be a number or a string, got {}", value))
    }
}

impl From<CursorValue> for serde_json::Value {
    fn from(value: CursorValue) -> Self {
        match value {
            CursorValue::Integer(i) => serde_json::Value::Number(i.into()),
            CursorValue::Number(n) => serde_json::Value::Number(n),
            CursorValue::Text(s) => serde_json::Value::String(s),
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Integer(i) => write!(f, "{}", i),
            CursorValue::Number(n) => write!(f, "{}", n),
            CursorValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Per-stream bookmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<CursorValue>,
    /// Stream version; `None` asks the next run for a fresh one.
    #[serde(default)]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationState {
    #[serde(default)]
    pub currently_syncing: Option<String>,
    #[serde(default)]
    pub bookmarks: BTreeMap<String, Bookmark>,
}

impl ReplicationState {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidState {
            message: e.to_string(),
        })
    }

    pub fn bookmark(&self, tap_stream_id: &str) -> Option<&Bookmark> {
        self.bookmarks.get(tap_stream_id)
    }

    pub fn has_bookmark(&self, tap_stream_id: &str) -> bool {
        self.bookmarks.contains_key(tap_stream_id)
    }

    pub fn with_currently_syncing(mut self, tap_stream_id: Option<&str>) -> Self {
        self.currently_syncing = tap_stream_id.map(str::to_string);
        self
    }

    /// Applies `update` to the stream's bookmark, creating it if needed.
    pub fn with_bookmark<F>(mut self, tap_stream_id: &str, update: F) -> Self
    where
        F: FnOnce(&mut Bookmark),
    {
        update(self.bookmarks.entry(tap_stream_id.to_string()).or_default());
        self
    }
}

/// Rebuilds state for the streams of `catalog` from the persisted `raw` state.
///
/// A changed replication key invalidates the stream's cursor. The version is
/// carried over whenever the stream had a bookmark, even when it is empty.
pub fn build_state(raw: &ReplicationState, catalog: &Catalog) -> ReplicationState {
    let mut state = ReplicationState::default()
        .with_currently_syncing(raw.currently_syncing.as_deref());

    for entry in &catalog.streams {
        let id = entry.tap_stream_id.as_str();
        let previous = raw.bookmark(id);

        if let Some(replication_key) = entry.replication_key() {
            let carried = previous
                .filter(|b| b.replication_key.as_deref() == Some(replication_key))
                .and_then(|b| b.replication_key_value.clone());
            state = state.with_bookmark(id, |b| {
                b.replication_key = Some(replication_key.to_string());
                b.replication_key_value = carried;
            });
        }

        if let Some(previous) = previous {
            let version = previous.version;
            state = state.with_bookmark(id, |b| b.version = version);
        }
    }

    state
}
