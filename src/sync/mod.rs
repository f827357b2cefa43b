//! Extraction of the resolved catalog.
//!
//! Streams are synced one at a time in catalog order. Each stream consumes
//! the current [`ReplicationState`] snapshot and returns the next one; every
//! STATE message is one of these snapshots, so a checkpoint always matches
//! the records emitted before it.
//!
//! For each stream the engine:
//! 1. marks it as currently syncing and checkpoints,
//! 2. emits its SCHEMA,
//! 3. picks the stream version and, for incremental streams or streams never
//!    synced before, emits ACTIVATE_VERSION,
//! 4. streams the rows as RECORD messages, checkpointing periodically,
//! 5. for full-table streams, emits the closing ACTIVATE_VERSION and clears
//!    the version so the next run starts a new one.

pub mod query;
pub mod record;

use chrono::Utc;
use futures::TryStreamExt;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, StreamEntry};
use crate::checkpoint::CheckpointManager;
use crate::output::{Message, MessageSink};
use crate::provider::RowProvider;
use crate::state::{CursorValue, ReplicationState};
use crate::Result;

pub use query::{Query, ReplicationKey};

pub const DEFAULT_CHECKPOINT_INTERVAL_ROWS: u64 = 1000;

pub struct SyncEngine<'a, P: ?Sized, S> {
    provider: &'a P,
    sink: S,
    checkpoints: Option<CheckpointManager>,
    checkpoint_interval_rows: u64,
}

impl<'a, P, S> SyncEngine<'a, P, S>
where
    P: RowProvider + Sync + ?Sized,
    S: MessageSink,
{
    pub fn new(provider: &'a P, sink: S) -> Self {
        Self {
            provider,
            sink,
            checkpoints: None,
            checkpoint_interval_rows: DEFAULT_CHECKPOINT_INTERVAL_ROWS,
        }
    }

    /// Emits a checkpoint after every `rows` records of a stream.
    pub fn with_checkpoint_interval(mut self, rows: u64) -> Self {
        self.checkpoint_interval_rows = rows.max(1);
        self
    }

    /// Also persists every checkpoint through `manager`.
    pub fn with_checkpoint_manager(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Syncs every stream of `catalog`, starting from `state`, and returns
    /// the final state.
    pub async fn sync(&mut self, catalog: &Catalog, state: ReplicationState) -> Result<ReplicationState> {
        let mut state = state;
        for entry in &catalog.streams {
            state = self.sync_stream(entry, state).await?;
        }

        let state = state.with_currently_syncing(None);
        self.checkpoint(&state).await?;
        Ok(state)
    }

    async fn checkpoint(&mut self, state: &ReplicationState) -> Result<()> {
        self.sink.emit(&Message::state(state))?;
        if let Some(manager) = &self.checkpoints {
            manager.save(state).await?;
        }
        Ok(())
    }

    async fn sync_stream(&mut self, entry: &StreamEntry, state: ReplicationState) -> Result<ReplicationState> {
        let id = entry.tap_stream_id.as_str();
        let state = state.with_currently_syncing(Some(id));
        self.checkpoint(&state).await?;

        self.sink.emit(&Message::Schema {
            stream: entry.stream.clone(),
            schema: entry.schema.clone(),
            key_properties: entry.key_properties(),
            bookmark_properties: entry.replication_key().map(str::to_string).into_iter().collect(),
        })?;

        let columns: Vec<String> = entry.schema.properties.keys().cloned().collect();
        if columns.is_empty() {
            warn!(
                stream = %id,
                "There are no columns selected for table {}, skipping it", entry.table_name
            );
            return Ok(state);
        }

        let replication_key = current_replication_key(&state, entry)?;
        let bookmark_is_empty = !state.has_bookmark(id);
        let version = state
            .bookmark(id)
            .and_then(|b| b.version)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let mut state = state.with_bookmark(id, |b| b.version = Some(version));

        if replication_key.is_some() || bookmark_is_empty {
            self.sink.emit(&Message::activate_version(&entry.stream, version))?;
        }

        let query = query::build(entry, &columns, replication_key.as_ref(), self.provider.dialect());
        info!(stream = %id, sql = %query.sql, params = ?query.params, "Running query");

        let started = Instant::now();
        let mut rows_saved: u64 = 0;
        let mut rows = self.provider.execute(&query.sql, &query.params).await?;
        while let Some(row) = rows.try_next().await? {
            let record = record::row_to_record(id, &columns, row)?;
            let cursor = replication_key
                .as_ref()
                .and_then(|key| record.get(&key.column))
                .and_then(CursorValue::from_json);

            self.sink.emit(&Message::Record {
                stream: entry.stream.clone(),
                record,
                version,
            })?;
            rows_saved += 1;

            if let Some(cursor) = cursor {
                state = state.with_bookmark(id, |b| b.replication_key_value = Some(cursor));
            }
            if rows_saved % self.checkpoint_interval_rows == 0 {
                debug!(stream = %id, rows = rows_saved, "Checkpointing");
                self.checkpoint(&state).await?;
            }
        }
        drop(rows);

        info!(
            stream = %id,
            rows = rows_saved,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished syncing {}", entry
        );

        if replication_key.is_none() {
            self.sink.emit(&Message::activate_version(&entry.stream, version))?;
            state = state.with_bookmark(id, |b| b.version = None);
        }
        self.checkpoint(&state).await?;

        Ok(state)
    }
}

/// The incremental cursor bookmarked for `entry`, if the stream is keyed.
fn current_replication_key(state: &ReplicationState, entry: &StreamEntry) -> Result<Option<ReplicationKey>> {
    let Some(bookmark) = state.bookmark(&entry.tap_stream_id) else {
        return Ok(None);
    };
    let Some(column) = bookmark.replication_key.clone() else {
        return Ok(None);
    };

    let is_date_time = entry
        .schema
        .properties
        .get(&column)
        .map(|c| c.is_date_time())
        .unwrap_or(false);
    let value = bookmark
        .replication_key_value
        .as_ref()
        .map(|v| v.to_param(is_date_time))
        .transpose()?;

    Ok(Some(ReplicationKey { column, value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnMetadata, ColumnSchema, JsonType, StreamMetadata, TableSchema};
    use crate::provider::{Dialect, RowStream, RowValue};
    use async_trait::async_trait;
    use futures::StreamExt;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    struct FixedRows {
        rows: Vec<Vec<RowValue>>,
        executed: Mutex<Vec<Query>>,
    }

    impl FixedRows {
        fn new(rows: Vec<Vec<RowValue>>) -> Self {
            Self {
                rows,
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RowProvider for FixedRows {
        async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<RowStream> {
            self.executed.lock().unwrap().push(Query {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            Ok(futures::stream::iter(self.rows.clone().into_iter().map(Ok)).boxed())
        }
    }

    fn entry(replication_key: Option<&str>) -> StreamEntry {
        let mut properties = IndexMap::new();
        properties.insert("ID".to_string(), ColumnSchema::new(JsonType::Integer));
        let mut column_metadata = IndexMap::new();
        column_metadata.insert(
            "ID".to_string(),
            ColumnMetadata {
                sql_datatype: Some("integer".to_string()),
                ..ColumnMetadata::default()
            },
        );
        StreamEntry {
            tap_stream_id: "S-T".to_string(),
            stream: "T".to_string(),
            database_name: "S".to_string(),
            table_name: "T".to_string(),
            is_view: false,
            schema: TableSchema::new(properties),
            metadata: StreamMetadata {
                table_key_properties: Some(vec!["ID".to_string()]),
                replication_key: replication_key.map(str::to_string),
                selected: Some(true),
                ..StreamMetadata::default()
            },
            column_metadata,
        }
    }

    fn id_rows(count: i64) -> Vec<Vec<RowValue>> {
        (1..=count).map(|i| vec![RowValue::Integer(i)]).collect()
    }

    fn activations(messages: &[Message]) -> Vec<i64> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::ActivateVersion { version, .. } => Some(*version),
                _ => None,
            })
            .collect()
    }

    fn states(messages: &[Message]) -> Vec<&ReplicationState> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::State { value } => Some(value),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_table_version_cycle() {
        let provider = FixedRows::new(id_rows(2));
        let catalog = Catalog::new(vec![entry(None)]);

        let mut engine = SyncEngine::new(&provider, Vec::new());
        let state = engine.sync(&catalog, ReplicationState::default()).await.unwrap();
        let messages = engine.into_sink();

        let versions = activations(&messages);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0], versions[1]);
        assert_eq!(state.bookmark("S-T").unwrap().version, None);
        assert_eq!(state.currently_syncing, None);
        assert_eq!(provider.executed.lock().unwrap()[0].sql, "SELECT \"ID\" FROM \"S\".\"T\"");
    }

    #[tokio::test]
    async fn test_full_table_existing_bookmark_activates_once() {
        let provider = FixedRows::new(id_rows(1));
        let catalog = Catalog::new(vec![entry(None)]);
        let state = ReplicationState::default().with_bookmark("S-T", |b| b.version = Some(99));

        let mut engine = SyncEngine::new(&provider, Vec::new());
        engine.sync(&catalog, state).await.unwrap();
        let messages = engine.into_sink();

        assert_eq!(activations(&messages), vec![99]);
        let record_versions: Vec<i64> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Record { version, .. } => Some(*version),
                _ => None,
            })
            .collect();
        assert_eq!(record_versions, vec![99]);
    }

    #[tokio::test]
    async fn test_incremental_advances_cursor() {
        let provider = FixedRows::new(id_rows(3));
        let catalog = Catalog::new(vec![entry(Some("ID"))]);
        let state = ReplicationState::default().with_bookmark("S-T", |b| {
            b.replication_key = Some("ID".to_string());
            b.replication_key_value = Some(CursorValue::Integer(1));
            b.version = Some(7);
        });

        let mut engine = SyncEngine::new(&provider, Vec::new());
        let state = engine.sync(&catalog, state).await.unwrap();
        let messages = engine.into_sink();

        assert_eq!(activations(&messages), vec![7]);
        let bookmark = state.bookmark("S-T").unwrap();
        assert_eq!(bookmark.replication_key_value, Some(CursorValue::Integer(3)));
        assert_eq!(bookmark.version, Some(7));

        let executed = provider.executed.lock().unwrap();
        assert_eq!(
            executed[0].sql,
            "SELECT \"ID\" FROM \"S\".\"T\" WHERE \"ID\" >= ? ORDER BY \"ID\" ASC"
        );
        assert_eq!(executed[0].params, vec![RowValue::Integer(1)]);
    }

    #[tokio::test]
    async fn test_null_cursor_value_does_not_advance() {
        let provider = FixedRows::new(vec![vec![RowValue::Integer(5)], vec![RowValue::Null]]);
        let catalog = Catalog::new(vec![entry(Some("ID"))]);
        let state = ReplicationState::default().with_bookmark("S-T", |b| {
            b.replication_key = Some("ID".to_string());
        });

        let mut engine = SyncEngine::new(&provider, Vec::new());
        let state = engine.sync(&catalog, state).await.unwrap();

        assert_eq!(
            state.bookmark("S-T").unwrap().replication_key_value,
            Some(CursorValue::Integer(5))
        );
    }

    #[tokio::test]
    async fn test_periodic_checkpoints() {
        let provider = FixedRows::new(id_rows(5));
        let catalog = Catalog::new(vec![entry(Some("ID"))]);
        let state = ReplicationState::default().with_bookmark("S-T", |b| {
            b.replication_key = Some("ID".to_string());
        });

        let mut engine = SyncEngine::new(&provider, Vec::new()).with_checkpoint_interval(2);
        engine.sync(&catalog, state).await.unwrap();
        let messages = engine.into_sink();

        // currently_syncing, rows 2 and 4, end of stream, end of run
        let states = states(&messages);
        assert_eq!(states.len(), 5);
        assert_eq!(
            states[1].bookmark("S-T").unwrap().replication_key_value,
            Some(CursorValue::Integer(2))
        );
        assert_eq!(
            states[2].bookmark("S-T").unwrap().replication_key_value,
            Some(CursorValue::Integer(4))
        );
        assert_eq!(states[4].currently_syncing, None);
    }

    #[tokio::test]
    async fn test_zero_column_stream_skipped() {
        let provider = FixedRows::new(id_rows(1));
        let mut empty = entry(None);
        empty.schema.properties.clear();
        let catalog = Catalog::new(vec![empty]);

        let mut engine = SyncEngine::new(&provider, Vec::new());
        let state = engine.sync(&catalog, ReplicationState::default()).await.unwrap();
        let messages = engine.into_sink();

        assert!(provider.executed.lock().unwrap().is_empty());
        assert!(activations(&messages).is_empty());
        assert!(!state.has_bookmark("S-T"));
        assert!(matches!(messages[1], Message::Schema { .. }));
    }

    #[tokio::test]
    async fn test_uses_provider_dialect() {
        struct PgRows(FixedRows);

        #[async_trait]
        impl RowProvider for PgRows {
            fn dialect(&self) -> Dialect {
                Dialect::Postgres
            }

            async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<RowStream> {
                self.0.execute(sql, params).await
            }
        }

        let provider = PgRows(FixedRows::new(Vec::new()));
        let catalog = Catalog::new(vec![entry(Some("ID"))]);
        let state = ReplicationState::default().with_bookmark("S-T", |b| {
            b.replication_key = Some("ID".to_string());
            b.replication_key_value = Some(CursorValue::Integer(10));
        });

        let mut engine = SyncEngine::new(&provider, Vec::new());
        engine.sync(&catalog, state).await.unwrap();

        let executed = provider.0.executed.lock().unwrap();
        assert!(executed[0].sql.contains("\"ID\" >= $1::int8"));
    }
}
