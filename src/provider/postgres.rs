use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, error, info};

use super::{Column, Dialect, MetadataProvider, PrimaryKey, RowProvider, RowStream, RowValue, Table, TableKind};
use crate::{Error, Result};

const TABLES_SQL: &str = "
    SELECT table_schema::text,
           table_name::text,
           CASE table_type WHEN 'BASE TABLE' THEN 'T'
                           WHEN 'VIEW' THEN 'V'
                           ELSE table_type END::text
      FROM information_schema.tables
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
     ORDER BY table_schema, table_name";

const COLUMNS_SQL: &str = "
    SELECT table_schema::text,
           table_name::text,
           column_name::text,
           CASE udt_name WHEN 'int2' THEN 'SMALLINT'
                         WHEN 'int4' THEN 'INTEGER'
                         WHEN 'int8' THEN 'BIGINT'
                         WHEN 'float4' THEN 'FLOAT'
                         WHEN 'float8' THEN 'FLOAT'
                         WHEN 'numeric' THEN 'NUMERIC'
                         WHEN 'bpchar' THEN 'CHAR'
                         WHEN 'varchar' THEN 'VARCHAR'
                         WHEN 'date' THEN 'DATE'
                         WHEN 'timestamp' THEN 'TIMESTMP'
                         WHEN 'timestamptz' THEN 'TIMESTAMP'
                         WHEN 'time' THEN 'TIME'
                         ELSE upper(udt_name) END::text,
           character_maximum_length::int8,
           numeric_precision::int4,
           numeric_scale::int4
      FROM information_schema.columns
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
     ORDER BY table_schema, table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "
    SELECT k.table_schema::text,
           k.table_name::text,
           k.column_name::text,
           k.ordinal_position::int4
      FROM information_schema.key_column_usage k
      JOIN information_schema.table_constraints c
        ON k.constraint_schema = c.constraint_schema
       AND k.constraint_name = c.constraint_name
     WHERE c.constraint_type = 'PRIMARY KEY'";

/// Metadata and row provider backed by a PostgreSQL connection.
pub struct PostgresProvider {
    client: Client,
    connection_task: tokio::task::JoinHandle<()>,
    schemas: Vec<String>,
}

impl PostgresProvider {
    pub async fn connect(connection_string: &str, schemas: Vec<String>) -> Result<Self> {
        info!("Connecting to PostgreSQL source");

        let config = connection_string
            .parse::<Config>()
            .map_err(|e| Error::Connection(format!("Invalid connection string: {}", e)))?;

        let (client, connection) = config.connect(NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection error: {}", e);
            }
        });

        info!("Successfully connected to PostgreSQL");

        Ok(Self {
            client,
            connection_task,
            schemas,
        })
    }

    fn in_scope(&self, schema: &str) -> bool {
        self.schemas.is_empty() || self.schemas.iter().any(|s| s == schema)
    }

    pub async fn close(self) -> Result<()> {
        info!("Closing source connection");
        drop(self.client);
        self.connection_task.abort();
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for PostgresProvider {
    async fn tables(&self) -> Result<Vec<Table>> {
        debug!("Querying tables");
        let rows = self.client.query(TABLES_SQL, &[]).await?;
        let tables = rows.iter().map(table_from_row).collect::<PgResult<Vec<_>>>()?;

        Ok(tables.into_iter().filter(|t| self.in_scope(&t.schema)).collect())
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        debug!("Querying columns");
        let rows = self.client.query(COLUMNS_SQL, &[]).await?;
        let columns = rows.iter().map(column_from_row).collect::<PgResult<Vec<_>>>()?;

        Ok(columns.into_iter().filter(|c| self.in_scope(&c.schema)).collect())
    }

    async fn primary_keys(&self) -> Result<Vec<PrimaryKey>> {
        debug!("Querying primary keys");
        let rows = self.client.query(PRIMARY_KEYS_SQL, &[]).await?;
        let keys = rows.iter().map(primary_key_from_row).collect::<PgResult<Vec<_>>>()?;

        Ok(keys.into_iter().filter(|k| self.in_scope(&k.schema)).collect())
    }
}

#[async_trait]
impl RowProvider for PostgresProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<RowStream> {
        let bound: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(to_sql_param).collect();
        let stream = self
            .client
            .query_raw(sql, bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)))
            .await?;

        Ok(stream
            .map_err(Error::from)
            .map(|row| row.and_then(|r| decode_row(&r)))
            .boxed())
    }
}

type PgResult<T> = std::result::Result<T, tokio_postgres::Error>;

fn table_from_row(row: &Row) -> PgResult<Table> {
    Ok(Table {
        schema: row.try_get(0)?,
        name: row.try_get(1)?,
        kind: TableKind::from_code(row.try_get(2)?),
    })
}

fn column_from_row(row: &Row) -> PgResult<Column> {
    Ok(Column {
        schema: row.try_get(0)?,
        table: row.try_get(1)?,
        name: row.try_get(2)?,
        data_type: row.try_get(3)?,
        max_length: row.try_get(4)?,
        precision: row.try_get(5)?,
        scale: row.try_get(6)?,
        // PostgreSQL has no per-column character set
        charset_id: None,
    })
}

fn primary_key_from_row(row: &Row) -> PgResult<PrimaryKey> {
    Ok(PrimaryKey {
        schema: row.try_get(0)?,
        table: row.try_get(1)?,
        column: row.try_get(2)?,
        ordinal: row.try_get(3)?,
    })
}

fn to_sql_param(value: &RowValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        RowValue::Null => Box::new(Option::<String>::None),
        RowValue::Bool(v) => Box::new(*v),
        RowValue::Integer(v) => Box::new(*v),
        RowValue::Float(v) => Box::new(*v),
        RowValue::Numeric(v) => Box::new(v.clone()),
        RowValue::Text(v) => Box::new(v.clone()),
        RowValue::Timestamp(v) => Box::new(*v),
        RowValue::TimestampTz(v) => Box::new(*v),
        RowValue::Date(v) => Box::new(*v),
        RowValue::Time(v) => Box::new(*v),
    }
}

fn decode_row(row: &Row) -> Result<Vec<RowValue>> {
    (0..row.len()).map(|idx| decode_value(row, idx)).collect()
}

fn decode_value(row: &Row, idx: usize) -> Result<RowValue> {
    let column = &row.columns()[idx];
    let value = match column.type_().name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(RowValue::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| RowValue::Integer(v.into())),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| RowValue::Integer(v.into())),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(RowValue::Integer),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| RowValue::Float(v.into())),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(RowValue::Float),
        "numeric" => row
            .try_get::<_, Option<PgNumeric>>(idx)?
            .map(PgNumeric::into_row_value),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(RowValue::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| RowValue::TimestampTz(v.fixed_offset())),
        "date" => row.try_get::<_, Option<NaiveDate>>(idx)?.map(RowValue::Date),
        "time" => row.try_get::<_, Option<NaiveTime>>(idx)?.map(RowValue::Time),
        "text" | "varchar" | "bpchar" | "name" => {
            row.try_get::<_, Option<String>>(idx)?.map(RowValue::Text)
        }
        other => {
            return Err(Error::Conversion {
                message: format!("Column '{}' has undecodable type {}", column.name(), other),
            })
        }
    };
    Ok(value.unwrap_or(RowValue::Null))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// A `numeric` value decoded without loss of digits or range.
#[derive(Debug, PartialEq)]
enum PgNumeric {
    Finite(String),
    NaN,
    Infinity,
    NegativeInfinity,
}

impl PgNumeric {
    fn into_row_value(self) -> RowValue {
        match self {
            PgNumeric::Finite(text) => RowValue::Numeric(text),
            PgNumeric::NaN => RowValue::Float(f64::NAN),
            PgNumeric::Infinity => RowValue::Float(f64::INFINITY),
            PgNumeric::NegativeInfinity => RowValue::Float(f64::NEG_INFINITY),
        }
    }
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode_numeric(raw)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn read_u16(raw: &[u8], offset: usize) -> std::result::Result<u16, BoxError> {
    raw.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric value".into())
}

/// Decodes the binary `numeric` format: digit count, weight, sign and display
/// scale, followed by the base-10000 digits.
fn decode_numeric(raw: &[u8]) -> std::result::Result<PgNumeric, BoxError> {
    let ndigits = read_u16(raw, 0)? as usize;
    let weight = i32::from(read_u16(raw, 2)? as i16);
    let sign = read_u16(raw, 4)?;
    let dscale = read_u16(raw, 6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok(PgNumeric::NaN),
        NUMERIC_PINF => return Ok(PgNumeric::Infinity),
        NUMERIC_NINF => return Ok(PgNumeric::NegativeInfinity),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {:#x}", other).into()),
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(raw, 8 + 2 * i))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    // Groups outside the stored digits are zero.
    let digit = |idx: i32| -> u16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for idx in 1..=weight {
            text.push_str(&format!("{:04}", digit(idx)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(PgNumeric::Finite(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn finite(text: &str) -> PgNumeric {
        PgNumeric::Finite(text.to_string())
    }

    #[test]
    fn test_decode_numeric_scale() {
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[12, 5000])).unwrap(), finite("12.50"));
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[1])).unwrap(), finite("10000"));
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[])).unwrap(), finite("0.00"));
        assert_eq!(decode_numeric(&numeric(-1, NUMERIC_NEG, 4, &[1])).unwrap(), finite("-0.0001"));
        assert_eq!(decode_numeric(&numeric(-2, 0, 8, &[1])).unwrap(), finite("0.00000001"));
    }

    #[test]
    fn test_decode_numeric_beyond_native_decimal_range() {
        // 10^29 - 1, the maximum of DECIMAL(31, 2) minus the fraction
        let raw = numeric(7, 0, 2, &[9, 9999, 9999, 9999, 9999, 9999, 9999, 9999, 9900]);
        assert_eq!(
            decode_numeric(&raw).unwrap(),
            finite("99999999999999999999999999999.99")
        );

        let raw = numeric(4, NUMERIC_NEG, 2, &[9007, 1992, 5474, 995, 100]);
        assert_eq!(decode_numeric(&raw).unwrap(), finite("-9007199254740995.01"));
    }

    #[test]
    fn test_decode_numeric_special_values() {
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), PgNumeric::NaN);
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_PINF, 0, &[])).unwrap(), PgNumeric::Infinity);
        match decode_numeric(&numeric(0, NUMERIC_NINF, 0, &[])).unwrap().into_row_value() {
            RowValue::Float(f) => assert!(f.is_infinite() && f < 0.0),
            other => panic!("expected a float, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1, 0]).is_err());
        let mut raw = numeric(0, 0, 0, &[1]);
        raw.truncate(9);
        assert!(decode_numeric(&raw).is_err());
    }
}
