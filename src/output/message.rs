use indexmap::IndexMap;
use serde::Serialize;

use crate::catalog::TableSchema;
use crate::state::ReplicationState;

/// One line of the output protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: TableSchema,
        key_properties: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: IndexMap<String, serde_json::Value>,
        version: i64,
    },
    State {
        value: ReplicationState,
    },
    ActivateVersion {
        stream: String,
        version: i64,
    },
}

impl Message {
    pub fn state(value: &ReplicationState) -> Self {
        Message::State {
            value: value.clone(),
        }
    }

    pub fn activate_version(stream: &str, version: i64) -> Self {
        Message::ActivateVersion {
            stream: stream.to_string(),
            version,
        }
    }
}
