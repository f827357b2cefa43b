#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use sql_tap::config::{Config, SourceConfig, SslMode, SyncConfig};
use sql_tap::provider::{
    Column, MetadataProvider, PrimaryKey, RowProvider, RowStream, RowValue, Table, TableKind,
};
use sql_tap::Result;
use std::collections::HashMap;
use std::env;
use std::sync::Mutex;

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let source = SourceConfig {
        host: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("TEST_PG_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .unwrap_or(5432),
        database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
        username: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
        password: env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        connect_timeout_secs: 30,
        ssl_mode: SslMode::Disable,
        schemas: vec![format!("tap_test_{}", std::process::id())],
    };

    Config {
        source,
        sync: SyncConfig::default(),
    }
}

/// An executed statement with its bound parameters.
#[derive(Debug, Clone)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<RowValue>,
}

/// Source database held in memory.
///
/// Rows are returned for whichever table the statement selects from. The
/// source does not evaluate predicates; tests assert on the recorded SQL.
#[derive(Default)]
pub struct InMemorySource {
    tables: Vec<Table>,
    columns: Vec<Column>,
    primary_keys: Vec<PrimaryKey>,
    rows: HashMap<(String, String), Vec<Vec<RowValue>>>,
    executed: Mutex<Vec<Executed>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, schema: &str, name: &str, kind: TableKind) -> Self {
        self.tables.push(Table {
            schema: schema.to_string(),
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, schema: &str, table: &str, column: &str, ordinal: i32) -> Self {
        self.primary_keys.push(PrimaryKey {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            ordinal,
        });
        self
    }

    pub fn with_rows(mut self, schema: &str, table: &str, rows: Vec<Vec<RowValue>>) -> Self {
        self.rows.insert((schema.to_string(), table.to_string()), rows);
        self
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataProvider for InMemorySource {
    async fn tables(&self) -> Result<Vec<Table>> {
        Ok(self.tables.clone())
    }

    async fn columns(&self) -> Result<Vec<Column>> {
        Ok(self.columns.clone())
    }

    async fn primary_keys(&self) -> Result<Vec<PrimaryKey>> {
        Ok(self.primary_keys.clone())
    }
}

#[async_trait]
impl RowProvider for InMemorySource {
    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<RowStream> {
        self.executed.lock().unwrap().push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let rows = self
            .rows
            .iter()
            .find(|((schema, table), _)| sql.contains(&format!(" FROM \"{}\".\"{}\"", schema, table)))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();

        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

/// `T(ID integer primary key, NAME varchar(50))` in schema `S` with two rows.
pub fn people_source() -> InMemorySource {
    InMemorySource::new()
        .with_table("S", "T", TableKind::Table)
        .with_column(Column::new("S", "T", "ID", "SMALLINT"))
        .with_column(Column::new("S", "T", "NAME", "VARCHAR").with_max_length(50))
        .with_primary_key("S", "T", "ID", 1)
        .with_rows(
            "S",
            "T",
            vec![
                vec![RowValue::Integer(1), RowValue::Text("Alice".to_string())],
                vec![RowValue::Integer(2), RowValue::Text("Bob".to_string())],
            ],
        )
}
