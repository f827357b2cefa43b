use crate::catalog::schema::IMPLICIT_OFFSET_TIMESTAMP;
use crate::catalog::StreamEntry;
use crate::provider::{Dialect, RowValue};

/// Incremental cursor of a stream: the key column and, after the first run,
/// the last value extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationKey {
    pub column: String,
    pub value: Option<RowValue>,
}

/// Statement text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<RowValue>,
}

/// Quotes an identifier, doubling embedded quotes.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_sql(entry: &StreamEntry, column: &str, dialect: Dialect) -> String {
    if entry.sql_datatype(column) == Some(IMPLICIT_OFFSET_TIMESTAMP) {
        dialect.utc_timestamp(&quote(column))
    } else {
        quote(column)
    }
}

/// Builds the extraction statement for `columns` of `entry`.
///
/// With a replication key the rows are always ordered by it, and a known
/// cursor value bounds the scan from below (inclusive). The inclusive bound
/// re-emits the last row of the previous run; resumption is at-least-once.
pub fn build(
    entry: &StreamEntry,
    columns: &[String],
    replication_key: Option<&ReplicationKey>,
    dialect: Dialect,
) -> Query {
    let select_list = columns
        .iter()
        .map(|c| column_sql(entry, c, dialect))
        .collect::<Vec<_>>()
        .join(",");
    let mut sql = format!(
        "SELECT {} FROM {}.{}",
        select_list,
        quote(&entry.database_name),
        quote(&entry.table_name)
    );
    let mut params = Vec::new();

    if let Some(key) = replication_key {
        if let Some(value) = &key.value {
            sql.push_str(&format!(
                " WHERE {} >= {}",
                quote(&key.column),
                dialect.placeholder(1, value)
            ));
            params.push(value.clone());
        }
        sql.push_str(&format!(" ORDER BY {} ASC", quote(&key.column)));
    }

    Query { sql, params }
}
