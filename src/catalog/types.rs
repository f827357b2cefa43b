//! Catalog value types and their persisted JSON form.
//!
//! Internally a catalog is a list of [`StreamEntry`] values with typed
//! schemas and metadata. The persisted form follows the conventional layout
//! of `streams[]` with a JSON-schema `schema` and a breadcrumb-keyed
//! `metadata` list. Conversion between the two happens only in the serde
//! impls here, so no loosely typed maps reach the resolver or the sync engine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::HashSet;
use std::fmt;

use crate::{Error, Result};

/// Per-column extraction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inclusion {
    /// Always extracted (primary-key columns).
    Automatic,
    /// Extracted when selected.
    Available,
    /// Never extractable; carries the reason.
    Unsupported(String),
}

impl Inclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Inclusion::Automatic => "automatic",
            Inclusion::Available => "available",
            Inclusion::Unsupported(_) => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Inclusion::Unsupported(_))
    }
}

/// Non-null JSON type of a column. Every column is nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Integer,
    Number,
    String,
}

impl JsonType {
    fn as_str(&self) -> &'static str {
        match self {
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            _ => None,
        }
    }
}

/// Semantic type of one column plus its inclusion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawColumnSchema", into = "RawColumnSchema")]
pub struct ColumnSchema {
    pub inclusion: Inclusion,
    /// `None` for unsupported columns.
    pub json_type: Option<JsonType>,
    pub format: Option<String>,
    pub minimum: Option<Number>,
    pub maximum: Option<Number>,
    pub exclusive_minimum: Option<bool>,
    pub exclusive_maximum: Option<bool>,
    pub multiple_of: Option<Number>,
    pub max_length: Option<i64>,
    /// Legacy property-level selection flag.
    pub selected: Option<bool>,
}

impl ColumnSchema {
    pub fn new(json_type: JsonType) -> Self {
        Self {
            inclusion: Inclusion::Available,
            json_type: Some(json_type),
            format: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
            multiple_of: None,
            max_length: None,
            selected: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            inclusion: Inclusion::Unsupported(reason.into()),
            json_type: None,
            ..Self::new(JsonType::String)
        }
    }

    pub fn is_date_time(&self) -> bool {
        self.format.as_deref() == Some("date-time")
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawType {
    One(String),
    Many(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawColumnSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inclusion: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    json_type: Option<RawType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minimum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    maximum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclusive_minimum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclusive_maximum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multiple_of: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<bool>,
}

fn parse_inclusion(tag: Option<&str>, description: Option<String>) -> std::result::Result<Inclusion, String> {
    match tag {
        Some("automatic") => Ok(Inclusion::Automatic),
        Some("available") | None => Ok(Inclusion::Available),
        Some("unsupported") => Ok(Inclusion::Unsupported(description.unwrap_or_default())),
        Some(other) => Err(format!("Unknown inclusion {}", other)),
    }
}

impl TryFrom<RawColumnSchema> for ColumnSchema {
    type Error = String;

    fn try_from(raw: RawColumnSchema) -> std::result::Result<Self, Self::Error> {
        let inclusion = parse_inclusion(raw.inclusion.as_deref(), raw.description)?;

        let names = match raw.json_type {
            None => Vec::new(),
            Some(RawType::One(name)) => vec![name],
            Some(RawType::Many(names)) => names,
        };
        let mut json_type = None;
        for name in names.iter().filter(|n| n.as_str() != "null") {
            json_type = Some(JsonType::parse(name).ok_or_else(|| format!("Unknown column type {}", name))?);
        }

        Ok(ColumnSchema {
            inclusion,
            json_type,
            format: raw.format,
            minimum: raw.minimum,
            maximum: raw.maximum,
            exclusive_minimum: raw.exclusive_minimum,
            exclusive_maximum: raw.exclusive_maximum,
            multiple_of: raw.multiple_of,
            max_length: raw.max_length,
            selected: raw.selected,
        })
    }
}

impl From<ColumnSchema> for RawColumnSchema {
    fn from(schema: ColumnSchema) -> Self {
        let description = match &schema.inclusion {
            Inclusion::Unsupported(reason) => Some(reason.clone()),
            _ => None,
        };
        RawColumnSchema {
            inclusion: Some(schema.inclusion.as_str().to_string()),
            json_type: schema
                .json_type
                .map(|t| RawType::Many(vec!["null".to_string(), t.as_str().to_string()])),
            format: schema.format,
            minimum: schema.minimum,
            maximum: schema.maximum,
            exclusive_minimum: schema.exclusive_minimum,
            exclusive_maximum: schema.exclusive_maximum,
            multiple_of: schema.multiple_of,
            max_length: schema.max_length,
            description,
            selected: schema.selected,
        }
    }
}

/// Object schema of a whole stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTableSchema", into = "RawTableSchema")]
pub struct TableSchema {
    pub properties: IndexMap<String, ColumnSchema>,
    /// Unsupported when the table's structural type cannot be extracted.
    pub inclusion: Inclusion,
    /// Legacy stream-level selection flag.
    pub selected: Option<bool>,
}

impl TableSchema {
    pub fn new(properties: IndexMap<String, ColumnSchema>) -> Self {
        Self {
            properties,
            inclusion: Inclusion::Available,
            selected: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawTableSchema {
    #[serde(rename = "type", default = "object_type")]
    json_type: String,
    #[serde(default)]
    properties: IndexMap<String, ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inclusion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<bool>,
}

fn object_type() -> String {
    "object".to_string()
}

impl TryFrom<RawTableSchema> for TableSchema {
    type Error = String;

    fn try_from(raw: RawTableSchema) -> std::result::Result<Self, Self::Error> {
        Ok(TableSchema {
            properties: raw.properties,
            inclusion: parse_inclusion(raw.inclusion.as_deref(), raw.description)?,
            selected: raw.selected,
        })
    }
}

impl From<TableSchema> for RawTableSchema {
    fn from(schema: TableSchema) -> Self {
        let (inclusion, description) = match schema.inclusion {
            Inclusion::Unsupported(reason) => (Some("unsupported".to_string()), Some(reason)),
            _ => (None, None),
        };
        RawTableSchema {
            json_type: object_type(),
            properties: schema.properties,
            inclusion,
            description,
            selected: schema.selected,
        }
    }
}

/// Metadata at the empty breadcrumb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_key_properties: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_key_properties: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_replication_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

/// Metadata at breadcrumb `["properties", <column>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ColumnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_by_default: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

/// One extractable table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamEntry", into = "RawStreamEntry")]
pub struct StreamEntry {
    pub tap_stream_id: String,
    pub stream: String,
    pub database_name: String,
    pub table_name: String,
    pub is_view: bool,
    pub schema: TableSchema,
    pub metadata: StreamMetadata,
    pub column_metadata: IndexMap<String, ColumnMetadata>,
}

impl StreamEntry {
    pub fn stream_id(schema: &str, table: &str) -> String {
        format!("{}-{}", schema, table)
    }

    pub fn is_selected(&self) -> bool {
        self.metadata
            .selected
            .or(self.schema.selected)
            .unwrap_or(false)
    }

    pub fn replication_key(&self) -> Option<&str> {
        self.metadata.replication_key.as_deref()
    }

    /// Whether the user explicitly selected `column`.
    pub fn is_column_selected(&self, column: &str) -> bool {
        let from_metadata = self.column_metadata.get(column).and_then(|m| m.selected);
        let from_schema = self.schema.properties.get(column).and_then(|s| s.selected);
        from_metadata.or(from_schema).unwrap_or(false)
    }

    pub fn sql_datatype(&self, column: &str) -> Option<&str> {
        self.column_metadata
            .get(column)
            .and_then(|m| m.sql_datatype.as_deref())
    }

    pub fn key_properties(&self) -> Vec<String> {
        let keys = if self.is_view {
            &self.metadata.view_key_properties
        } else {
            &self.metadata.table_key_properties
        };
        keys.clone().unwrap_or_default()
    }
}

impl fmt::Display for StreamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database_name, self.table_name)
    }
}

#[derive(Serialize, Deserialize)]
struct RawMetadataEntry {
    breadcrumb: Vec<String>,
    metadata: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct RawStreamEntry {
    tap_stream_id: String,
    stream: String,
    database_name: String,
    table_name: String,
    #[serde(default)]
    is_view: bool,
    schema: TableSchema,
    #[serde(default)]
    metadata: Vec<RawMetadataEntry>,
}

impl TryFrom<RawStreamEntry> for StreamEntry {
    type Error = String;

    fn try_from(raw: RawStreamEntry) -> std::result::Result<Self, Self::Error> {
        let mut metadata = StreamMetadata::default();
        let mut column_metadata = IndexMap::new();

        for entry in raw.metadata {
            match entry.breadcrumb.as_slice() {
                [] => {
                    metadata = serde_json::from_value(entry.metadata)
                        .map_err(|e| format!("Invalid stream metadata for {}: {}", raw.tap_stream_id, e))?;
                }
                [properties, column] if properties == "properties" => {
                    let parsed: ColumnMetadata = serde_json::from_value(entry.metadata).map_err(|e| {
                        format!("Invalid metadata for {}.{}: {}", raw.tap_stream_id, column, e)
                    })?;
                    column_metadata.insert(column.clone(), parsed);
                }
                other => {
                    return Err(format!(
                        "Invalid breadcrumb {:?} in stream {}",
                        other, raw.tap_stream_id
                    ))
                }
            }
        }

        Ok(StreamEntry {
            tap_stream_id: raw.tap_stream_id,
            stream: raw.stream,
            database_name: raw.database_name,
            table_name: raw.table_name,
            is_view: raw.is_view,
            schema: raw.schema,
            metadata,
            column_metadata,
        })
    }
}

impl From<StreamEntry> for RawStreamEntry {
    fn from(entry: StreamEntry) -> Self {
        let mut metadata = Vec::with_capacity(entry.column_metadata.len() + 1);
        metadata.push(RawMetadataEntry {
            breadcrumb: Vec::new(),
            metadata: serde_json::to_value(&entry.metadata).unwrap_or_default(),
        });
        for (column, column_metadata) in &entry.column_metadata {
            metadata.push(RawMetadataEntry {
                breadcrumb: vec!["properties".to_string(), column.clone()],
                metadata: serde_json::to_value(column_metadata).unwrap_or_default(),
            });
        }

        RawStreamEntry {
            tap_stream_id: entry.tap_stream_id,
            stream: entry.stream,
            database_name: entry.database_name,
            table_name: entry.table_name,
            is_view: entry.is_view,
            schema: entry.schema,
            metadata,
        }
    }
}

/// Ordered set of streams keyed by `tap_stream_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<StreamEntry>,
}

impl Catalog {
    pub fn new(streams: Vec<StreamEntry>) -> Self {
        Self { streams }
    }

    /// Parses a persisted catalog. Any structural problem, including an
    /// unrecognized inclusion or a duplicated stream id, is fatal.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(json).map_err(|e| Error::CorruptCatalog {
            message: e.to_string(),
        })?;
        catalog.check_unique()?;
        Ok(catalog)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn get_stream(&self, tap_stream_id: &str) -> Option<&StreamEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == tap_stream_id)
    }

    fn check_unique(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.tap_stream_id.as_str()) {
                return Err(Error::CorruptCatalog {
                    message: format!("Duplicate stream id {}", stream.tap_stream_id),
                });
            }
        }
        Ok(())
    }
}
