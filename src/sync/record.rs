//! Conversion of extracted rows into record values.
//!
//! Temporal values are written as ISO-8601 strings with an explicit offset.
//! Timestamps without an offset were already shifted to UTC by the query.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexMap;
use serde_json::{Number, Value};
use tracing::warn;

use crate::provider::RowValue;
use crate::{Error, Result};

/// Seconds are followed by microseconds only when the value has a fraction.
fn iso_format(nanos: u32) -> &'static str {
    if nanos == 0 {
        "%Y-%m-%dT%H:%M:%S"
    } else {
        "%Y-%m-%dT%H:%M:%S%.6f"
    }
}

fn utc_iso(ts: &NaiveDateTime) -> String {
    format!("{}+00:00", ts.format(iso_format(ts.nanosecond())))
}

pub fn to_json(value: RowValue) -> Result<Value> {
    Ok(match value {
        RowValue::Null => Value::Null,
        RowValue::Bool(b) => Value::Bool(b),
        RowValue::Integer(i) => Value::Number(i.into()),
        RowValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        RowValue::Numeric(text) => Value::Number(text.parse::<Number>().map_err(|e| Error::Conversion {
            message: format!("Invalid numeric value '{}': {}", text, e),
        })?),
        RowValue::Text(s) => Value::String(s),
        RowValue::Timestamp(ts) => Value::String(utc_iso(&ts)),
        RowValue::TimestampTz(ts) => {
            let format = format!("{}%:z", iso_format(ts.nanosecond()));
            Value::String(ts.format(&format).to_string())
        }
        RowValue::Date(d) => Value::String(utc_iso(&d.and_time(NaiveTime::MIN))),
        // NaiveDate::default() is the epoch date
        RowValue::Time(t) => Value::String(utc_iso(&NaiveDate::default().and_time(t))),
    })
}

/// Pairs a row of `stream` with its column names.
pub fn row_to_record(stream: &str, columns: &[String], row: Vec<RowValue>) -> Result<IndexMap<String, Value>> {
    if row.len() != columns.len() {
        return Err(Error::Provider {
            message: format!("Row has {} values but {} columns were requested", row.len(), columns.len()),
        });
    }
    columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            if let RowValue::Float(f) = value {
                if !f.is_finite() {
                    warn!(stream = %stream, column = %column, value = %f, "Non-finite float written as null");
                }
            }
            Ok((column.clone(), to_json(value)?))
        })
        .collect()
}
