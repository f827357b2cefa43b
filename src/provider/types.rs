use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Structural type of a discovered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Table,
    View,
    Other(String),
}

impl TableKind {
    /// Parses a catalog table-type code (`T`, `V`, anything else).
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "T" | "BASE TABLE" => TableKind::Table,
            "V" | "VIEW" => TableKind::View,
            other => TableKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub charset_id: Option<i32>,
}

impl Column {
    pub fn new(schema: &str, table: &str, name: &str, data_type: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            name: name.to_string(),
            data_type: data_type.to_string(),
            max_length: None,
            precision: None,
            scale: None,
            charset_id: None,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_charset_id(mut self, charset_id: i32) -> Self {
        self.charset_id = Some(charset_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub ordinal: i32,
}

/// A single value read from, or bound into, a query.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Exact decimal in plain or exponent notation, e.g. `-12.50`.
    Numeric(String),
    Text(String),
    /// Timestamp without offset, already normalized to UTC by the query.
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

/// SQL flavour of a row provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Db2,
    Postgres,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index` bound to `value`.
    pub fn placeholder(&self, index: usize, value: &RowValue) -> String {
        match self {
            Dialect::Db2 => "?".to_string(),
            Dialect::Postgres => match postgres_cast(value) {
                Some(cast) => format!("${}::{}", index, cast),
                None => format!("${}", index),
            },
        }
    }

    /// Expression converting an implicit-offset timestamp column to UTC.
    pub fn utc_timestamp(&self, quoted_column: &str) -> String {
        match self {
            Dialect::Db2 => format!("{} - CURRENT TIMEZONE", quoted_column),
            Dialect::Postgres => format!(
                "({} AT TIME ZONE current_setting('TimeZone')) AT TIME ZONE 'UTC'",
                quoted_column
            ),
        }
    }
}

fn postgres_cast(value: &RowValue) -> Option<&'static str> {
    match value {
        RowValue::Null => None,
        RowValue::Bool(_) => Some("bool"),
        RowValue::Integer(_) => Some("int8"),
        RowValue::Float(_) => Some("float8"),
        // Bound as text so values beyond any native decimal range stay exact.
        RowValue::Numeric(_) => Some("text::numeric"),
        RowValue::Text(_) => Some("text"),
        RowValue::Timestamp(_) => Some("timestamp"),
        RowValue::TimestampTz(_) => Some("timestamptz"),
        RowValue::Date(_) => Some("date"),
        RowValue::Time(_) => Some("time"),
    }
}
