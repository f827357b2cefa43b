//! Reconciles the user's catalog with freshly discovered structure.
//!
//! The resolved catalog contains only selected streams that still exist,
//! restricted to the columns that will actually be extracted, and with the
//! schemas taken from discovery rather than from the (possibly stale) user
//! input.

use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::warn;

use super::types::{Catalog, ColumnSchema, Inclusion, StreamEntry, TableSchema};
use crate::state::ReplicationState;

/// Builds the catalog to sync from the user `catalog`, the `discovered`
/// catalog and the current `state`.
///
/// Streams not marked selected are dropped. When `state` names a currently
/// syncing stream, every selected stream before it is dropped so the run
/// resumes where the previous one stopped. Streams missing from `discovered`
/// are dropped with a warning.
pub fn resolve_catalog(catalog: &Catalog, discovered: &Catalog, state: &ReplicationState) -> Catalog {
    let mut streams: Vec<&StreamEntry> = catalog.streams.iter().filter(|s| s.is_selected()).collect();

    if let Some(current) = state.currently_syncing.as_deref() {
        // An id that is no longer selected leaves nothing to resume into.
        let start = streams
            .iter()
            .position(|s| s.tap_stream_id == current)
            .unwrap_or(streams.len());
        streams.drain(..start);
    }

    let mut result = Vec::with_capacity(streams.len());
    for entry in streams {
        let Some(discovered_entry) = discovered.get_stream(&entry.tap_stream_id) else {
            warn!(
                stream = %entry.tap_stream_id,
                "Database {} table {} was selected but does not exist",
                entry.database_name,
                entry.table_name
            );
            continue;
        };

        if let Inclusion::Unsupported(reason) = &discovered_entry.schema.inclusion {
            warn!(
                stream = %entry.tap_stream_id,
                "Table {} was selected but is not supported: {}", entry, reason
            );
            continue;
        }

        let mut selected: BTreeSet<String> = entry
            .schema
            .properties
            .keys()
            .chain(entry.column_metadata.keys())
            .filter(|c| entry.is_column_selected(c))
            .cloned()
            .collect();
        if let Some(replication_key) = entry.replication_key() {
            selected.insert(replication_key.to_string());
        }

        let properties = desired_columns(entry, &selected, &discovered_entry.schema);
        let column_metadata = properties
            .keys()
            .map(|column| {
                let mut metadata = discovered_entry
                    .column_metadata
                    .get(column)
                    .cloned()
                    .unwrap_or_default();
                metadata.selected = entry.column_metadata.get(column).and_then(|m| m.selected);
                (column.clone(), metadata)
            })
            .collect();

        result.push(StreamEntry {
            tap_stream_id: entry.tap_stream_id.clone(),
            stream: entry.stream.clone(),
            database_name: entry.database_name.clone(),
            table_name: entry.table_name.clone(),
            is_view: entry.is_view,
            schema: TableSchema {
                properties,
                inclusion: Inclusion::Available,
                selected: entry.schema.selected,
            },
            metadata: entry.metadata.clone(),
            column_metadata,
        });
    }

    Catalog::new(result)
}

/// Columns to extract, in discovered order: the selected available columns
/// plus every automatic column.
fn desired_columns(
    entry: &StreamEntry,
    selected: &BTreeSet<String>,
    discovered: &TableSchema,
) -> IndexMap<String, ColumnSchema> {
    let mut unsupported = Vec::new();
    let mut auto_added = Vec::new();
    let mut columns = IndexMap::new();

    for (name, schema) in &discovered.properties {
        let is_selected = selected.contains(name);
        match &schema.inclusion {
            Inclusion::Automatic => {
                if !is_selected {
                    auto_added.push(name.as_str());
                }
                columns.insert(name.clone(), schema.clone());
            }
            Inclusion::Available => {
                if is_selected {
                    columns.insert(name.clone(), schema.clone());
                }
            }
            Inclusion::Unsupported(_) => {
                if is_selected {
                    unsupported.push(name.as_str());
                }
            }
        }
    }

    let nonexistent: Vec<&str> = selected
        .iter()
        .filter(|c| !discovered.properties.contains_key(*c))
        .map(String::as_str)
        .collect();

    if !unsupported.is_empty() {
        warn!(
            stream = %entry.tap_stream_id,
            "Columns {:?} were selected but are not supported. Skipping them.", unsupported
        );
    }
    if !nonexistent.is_empty() {
        warn!(
            stream = %entry.tap_stream_id,
            "Columns {:?} were selected but do not exist.", nonexistent
        );
    }
    if !auto_added.is_empty() {
        warn!(
            stream = %entry.tap_stream_id,
            "Columns {:?} are primary keys but were not selected. Adding them.", auto_added
        );
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builder;
    use crate::catalog::types::{ColumnMetadata, StreamMetadata};
    use crate::provider::{Column, PrimaryKey, Table, TableKind};

    fn discovered() -> Catalog {
        let tables = ["A", "B", "C"]
            .iter()
            .map(|name| Table {
                schema: "S".to_string(),
                name: name.to_string(),
                kind: TableKind::Table,
            })
            .collect::<Vec<_>>();
        let mut columns = Vec::new();
        let mut keys = Vec::new();
        for table in ["A", "B", "C"] {
            columns.push(Column::new("S", table, "ID", "INTEGER"));
            columns.push(Column::new("S", table, "NAME", "VARCHAR").with_max_length(20));
            columns.push(Column::new("S", table, "UPDATED", "TIMESTMP"));
            columns.push(Column::new("S", table, "PHOTO", "BLOB"));
            keys.push(PrimaryKey {
                schema: "S".to_string(),
                table: table.to_string(),
                column: "ID".to_string(),
                ordinal: 1,
            });
        }
        builder::build(&tables, &columns, &keys)
    }

    fn select(catalog: &Catalog, streams: &[&str], columns: &[&str]) -> Catalog {
        let mut catalog = catalog.clone();
        for entry in &mut catalog.streams {
            if streams.contains(&entry.table_name.as_str()) {
                entry.metadata.selected = Some(true);
                for column in columns {
                    entry
                        .column_metadata
                        .entry(column.to_string())
                        .or_insert_with(ColumnMetadata::default)
                        .selected = Some(true);
                }
            }
        }
        catalog
    }

    fn column_names(entry: &StreamEntry) -> Vec<&str> {
        entry.schema.properties.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_only_selected_streams_kept() {
        let discovered = discovered();
        let user = select(&discovered, &["A", "C"], &["NAME"]);

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        let ids: Vec<&str> = resolved.streams.iter().map(|s| s.tap_stream_id.as_str()).collect();
        assert_eq!(ids, vec!["S-A", "S-C"]);
    }

    #[test]
    fn test_automatic_columns_always_included() {
        let discovered = discovered();
        let user = select(&discovered, &["A"], &["NAME"]);

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert_eq!(column_names(&resolved.streams[0]), vec!["ID", "NAME"]);
    }

    #[test]
    fn test_replication_key_included() {
        let discovered = discovered();
        let mut user = select(&discovered, &["A"], &[]);
        user.streams[0].metadata.replication_key = Some("UPDATED".to_string());

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert_eq!(column_names(&resolved.streams[0]), vec!["ID", "UPDATED"]);
    }

    #[test]
    fn test_unsupported_and_missing_columns_dropped() {
        let discovered = discovered();
        let user = select(&discovered, &["B"], &["NAME", "PHOTO", "GONE"]);

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert_eq!(column_names(&resolved.streams[0]), vec!["ID", "NAME"]);
    }

    #[test]
    fn test_resume_from_currently_syncing() {
        let discovered = discovered();
        let user = select(&discovered, &["A", "B", "C"], &["NAME"]);
        let state = ReplicationState {
            currently_syncing: Some("S-B".to_string()),
            ..ReplicationState::default()
        };

        let resolved = resolve_catalog(&user, &discovered, &state);
        let ids: Vec<&str> = resolved.streams.iter().map(|s| s.tap_stream_id.as_str()).collect();
        assert_eq!(ids, vec!["S-B", "S-C"]);
    }

    #[test]
    fn test_missing_stream_dropped() {
        let discovered = discovered();
        let mut user = select(&discovered, &["A"], &["NAME"]);
        let mut gone = user.streams[0].clone();
        gone.tap_stream_id = "S-DROPPED".to_string();
        gone.table_name = "DROPPED".to_string();
        user.streams.insert(0, gone);

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert_eq!(resolved.streams.len(), 1);
        assert_eq!(resolved.streams[0].tap_stream_id, "S-A");
    }

    #[test]
    fn test_discovered_schema_wins() {
        let discovered = discovered();
        let mut user = select(&discovered, &["A"], &["NAME"]);
        user.streams[0].schema.properties["NAME"].max_length = Some(5);

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert_eq!(resolved.streams[0].schema.properties["NAME"].max_length, Some(20));
        assert_eq!(resolved.streams[0].metadata.selected, Some(true));
        assert_eq!(
            resolved.streams[0].sql_datatype("NAME"),
            Some("varchar")
        );
        assert!(resolved.streams[0].column_metadata.get("PHOTO").is_none());
    }

    #[test]
    fn test_unsupported_table_dropped() {
        let discovered = builder::build(
            &[Table {
                schema: "S".to_string(),
                name: "ALIAS".to_string(),
                kind: TableKind::Other("A".to_string()),
            }],
            &[Column::new("S", "ALIAS", "ID", "INTEGER")],
            &[],
        );
        let mut user = discovered.clone();
        user.streams[0].metadata = StreamMetadata {
            selected: Some(true),
            ..StreamMetadata::default()
        };

        let resolved = resolve_catalog(&user, &discovered, &ReplicationState::default());
        assert!(resolved.streams.is_empty());
    }
}
