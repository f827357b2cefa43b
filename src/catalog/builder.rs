use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::schema;
use super::types::{Catalog, ColumnMetadata, Inclusion, StreamEntry, StreamMetadata, TableSchema};
use crate::provider::{Column, MetadataProvider, PrimaryKey, Table, TableKind};
use crate::Result;

type TableId = (String, String);

/// Queries `provider` and builds a fresh catalog from what it reports.
pub async fn discover<P>(provider: &P) -> Result<Catalog>
where
    P: MetadataProvider + Sync + ?Sized,
{
    let tables = provider.tables().await?;
    let columns = provider.columns().await?;
    let primary_keys = provider.primary_keys().await?;

    info!(
        tables = tables.len(),
        columns = columns.len(),
        primary_keys = primary_keys.len(),
        "Discovered source metadata"
    );

    Ok(build(&tables, &columns, &primary_keys))
}

/// Groups raw metadata by table and builds one stream entry per table.
///
/// Streams follow the order of `tables` and columns the order of `columns`,
/// so unchanged metadata always yields an identical catalog. Columns and keys
/// of tables absent from `tables` are ignored.
pub fn build(tables: &[Table], columns: &[Column], primary_keys: &[PrimaryKey]) -> Catalog {
    let mut columns_by_table: HashMap<TableId, Vec<&Column>> = HashMap::new();
    for column in columns {
        columns_by_table
            .entry((column.schema.clone(), column.table.clone()))
            .or_default()
            .push(column);
    }

    let keys_by_table = key_columns_by_table(primary_keys);

    let mut seen = HashSet::new();
    let mut streams = Vec::with_capacity(tables.len());
    for table in tables {
        let id = (table.schema.clone(), table.name.clone());
        if !seen.insert(id.clone()) {
            debug!("Skipping duplicate table {}.{}", table.schema, table.name);
            continue;
        }
        let table_columns = columns_by_table.remove(&id).unwrap_or_default();
        let key_columns = keys_by_table.get(&id).cloned().unwrap_or_default();
        streams.push(build_entry(table, &table_columns, key_columns));
    }

    Catalog::new(streams)
}

/// Primary-key column names per table, sorted by ordinal position.
fn key_columns_by_table(primary_keys: &[PrimaryKey]) -> HashMap<TableId, Vec<String>> {
    let mut keys: HashMap<TableId, Vec<(i32, String)>> = HashMap::new();
    for pk in primary_keys {
        keys.entry((pk.schema.clone(), pk.table.clone()))
            .or_default()
            .push((pk.ordinal, pk.column.clone()));
    }

    keys.into_iter()
        .map(|(id, mut cols)| {
            cols.sort();
            (id, cols.into_iter().map(|(_, name)| name).collect())
        })
        .collect()
}

fn build_entry(table: &Table, columns: &[&Column], key_columns: Vec<String>) -> StreamEntry {
    let key_set: HashSet<String> = key_columns.iter().cloned().collect();

    let mut properties = IndexMap::with_capacity(columns.len());
    let mut column_metadata = IndexMap::with_capacity(columns.len());
    for column in columns {
        let column_schema = schema::for_column(column, &key_set);
        column_metadata.insert(
            column.name.clone(),
            ColumnMetadata {
                selected_by_default: Some(column_schema.inclusion.is_supported()),
                sql_datatype: Some(column.data_type.trim().to_lowercase()),
                selected: None,
            },
        );
        properties.insert(column.name.clone(), column_schema);
    }

    let mut table_schema = TableSchema::new(properties);
    let is_view = match &table.kind {
        TableKind::Table => false,
        TableKind::View => true,
        TableKind::Other(kind) => {
            table_schema.inclusion = Inclusion::Unsupported(format!("Unsupported table type {}", kind));
            false
        }
    };

    let metadata = StreamMetadata {
        table_key_properties: Some(key_columns),
        valid_replication_keys: Some(schema::valid_replication_keys(columns.iter().copied())),
        ..StreamMetadata::default()
    };

    StreamEntry {
        tap_stream_id: StreamEntry::stream_id(&table.schema, &table.name),
        stream: table.name.clone(),
        database_name: table.schema.clone(),
        table_name: table.name.clone(),
        is_view,
        schema: table_schema,
        metadata,
        column_metadata,
    }
}
