//! Mapping of raw column descriptors to column schemas.
//!
//! [`for_column`] is total: a type it does not recognize becomes an
//! [`Inclusion::Unsupported`] column rather than an error, so one odd column
//! never fails discovery.

use serde_json::Number;
use std::collections::HashSet;

use super::types::{ColumnSchema, Inclusion, JsonType};
use crate::provider::Column;

/// Character set ids whose data cannot be decoded as text (binary data).
pub const UNSUPPORTED_CHARSET_IDS: &[i32] = &[65535];

/// Raw type of a timestamp stored with an implicit (server local) offset.
pub const IMPLICIT_OFFSET_TIMESTAMP: &str = "timestmp";

fn integer_bytes(data_type: &str) -> Option<u32> {
    match data_type {
        "smallint" => Some(2),
        "integer" | "int" => Some(4),
        "bigint" => Some(8),
        _ => None,
    }
}

fn is_float(data_type: &str) -> bool {
    matches!(data_type, "float" | "real" | "double" | "decfloat")
}

fn is_decimal(data_type: &str) -> bool {
    matches!(data_type, "decimal" | "numeric")
}

fn is_string(data_type: &str) -> bool {
    matches!(data_type, "char" | "varchar")
}

fn is_temporal(data_type: &str) -> bool {
    matches!(data_type, "date" | "timestmp" | "timestamp" | "time")
}

/// Builds the schema for `column`. `key_columns` holds the primary-key column
/// names of the column's table.
pub fn for_column(column: &Column, key_columns: &HashSet<String>) -> ColumnSchema {
    let data_type = column.data_type.trim().to_lowercase();

    let mut schema = if let Some(bytes) = integer_bytes(&data_type) {
        integer_schema(bytes)
    } else if is_float(&data_type) {
        ColumnSchema::new(JsonType::Number)
    } else if is_decimal(&data_type) {
        decimal_schema(column.precision, column.scale)
    } else if is_string(&data_type) {
        match column.charset_id {
            Some(id) if UNSUPPORTED_CHARSET_IDS.contains(&id) => {
                ColumnSchema::unsupported(format!("Unsupported character set id {}", id))
            }
            _ => {
                let mut schema = ColumnSchema::new(JsonType::String);
                schema.max_length = column.max_length.filter(|len| *len > 0);
                schema
            }
        }
    } else if is_temporal(&data_type) {
        let mut schema = ColumnSchema::new(JsonType::String);
        schema.format = Some("date-time".to_string());
        schema
    } else {
        ColumnSchema::unsupported(format!("Unsupported data type {}", data_type))
    };

    if schema.inclusion.is_supported() && is_key_column(&column.name, key_columns) {
        schema.inclusion = Inclusion::Automatic;
    }
    schema
}

fn is_key_column(name: &str, key_columns: &HashSet<String>) -> bool {
    key_columns.iter().any(|k| k.eq_ignore_ascii_case(name))
}

fn integer_schema(bytes: u32) -> ColumnSchema {
    let bits = bytes * 8;
    let max = if bits >= 64 {
        i64::MAX
    } else {
        (1i64 << (bits - 1)) - 1
    };
    let mut schema = ColumnSchema::new(JsonType::Integer);
    schema.minimum = Some(Number::from(-max - 1));
    schema.maximum = Some(Number::from(max));
    schema
}

fn decimal_schema(precision: Option<i32>, scale: Option<i32>) -> ColumnSchema {
    let mut schema = ColumnSchema::new(JsonType::Number);
    let Some(precision) = precision else {
        return schema;
    };
    let scale = scale.unwrap_or(0);

    let limit = power_of_ten(precision - scale);
    schema.maximum = limit.clone();
    schema.minimum = limit.and_then(|n| negate(&n));
    schema.exclusive_maximum = Some(true);
    schema.exclusive_minimum = Some(true);
    schema.multiple_of = power_of_ten(-scale);
    schema
}

/// `10^exp` as an exact integer when it fits, otherwise the nearest float.
fn power_of_ten(exp: i32) -> Option<Number> {
    if (0..=18).contains(&exp) {
        return Some(Number::from(10i64.pow(exp as u32)));
    }
    format!("1e{}", exp)
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
}

fn negate(n: &Number) -> Option<Number> {
    match n.as_i64() {
        Some(i) => Some(Number::from(-i)),
        None => n.as_f64().and_then(|f| Number::from_f64(-f)),
    }
}

/// Columns usable as an incremental cursor: integers, decimals, dates and
/// timestamps.
pub fn valid_replication_keys<'a, I>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Column>,
{
    columns
        .into_iter()
        .filter(|c| is_orderable(&c.data_type.trim().to_lowercase()))
        .map(|c| c.name.clone())
        .collect()
}

fn is_orderable(data_type: &str) -> bool {
    integer_bytes(data_type).is_some()
        || is_decimal(data_type)
        || matches!(data_type, "date" | "timestmp" | "timestamp")
}
