//! Row replication to and from a lix server
//!
//! The client copies whole table rows over the SQL-over-HTTP protocol in
//! [`protocol`]. It does not detect conflicts; replicated changes are merged
//! like any other changes.

pub mod client;
pub mod protocol;
pub mod retry;
pub mod server;

use rusqlite::Connection;

use crate::database::codec::{self, COMMIT_COLUMNS, CONFLICT_COLUMNS, FILE_COLUMNS};
use crate::error::{LixError, Result};
use crate::schema::EntityKey;

pub use client::SyncClient;
pub use protocol::{NewLixResponse, QueryRequest, QueryResponse, SqlRow, SqlValue};
pub use retry::RetryConfig;
pub use server::{LspHandler, LspStorage, MemoryLspStorage};

/// Tables replicated by default. `branch` is per instance (its `active` flag)
/// and `change_queue` is local write-path state.
///
/// Pulled rows replace local rows on any unique key, not only the primary key:
/// a remote file takes over a local file at the same path, and a remote
/// uncommitted change replaces the local working change of the same entity.
/// The client logs such replacements at `warn` (see [`displaced_rows`]).
pub const SYNCED_TABLES: &[&str] = &["key_value", "file", "change", "commit", "conflict"];

const CHANGE_TABLE_COLUMNS: &str =
    "id, parent_id, type, file_id, plugin_key, entity_id, operation, value, meta, commit_id, created_at";

/// Column list of a replicated table
pub fn table_columns(table: &str) -> Result<&'static str> {
    match table {
        "key_value" => Ok("key, value"),
        "file" => Ok(FILE_COLUMNS),
        "change" => Ok(CHANGE_TABLE_COLUMNS),
        "commit" => Ok(COMMIT_COLUMNS),
        "conflict" => Ok(CONFLICT_COLUMNS),
        other => Err(LixError::InvalidTable(other.to_string())),
    }
}

/// `SELECT` of every row of a table
pub fn select_all(table: &str) -> Result<QueryRequest> {
    let columns = table_columns(table)?;
    Ok(QueryRequest::new(format!("SELECT {} FROM \"{}\"", columns, table)))
}

/// Upsert statement for `rows`, with values in column order.
///
/// Uses `INSERT OR REPLACE`, so conflicting local rows are deleted first.
pub fn upsert_rows(table: &str, rows: &[SqlRow]) -> Result<QueryRequest> {
    let columns: Vec<&str> = table_columns(table)?.split(", ").collect();

    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let placeholders: Vec<String> = columns
            .iter()
            .map(|column| {
                params.push(row.get(*column).cloned().unwrap_or(SqlValue::Null));
                format!("?{}", params.len())
            })
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    Ok(QueryRequest::new(format!(
        "INSERT OR REPLACE INTO \"{}\" ({}) VALUES {}",
        table,
        columns.join(", "),
        tuples.join(", ")
    ))
    .with_params(params))
}

fn text<'a>(row: &'a SqlRow, column: &str) -> Option<&'a str> {
    match row.get(column) {
        Some(SqlValue::Text(value)) => Some(value.as_str()),
        _ => None,
    }
}

/// Local rows of `table` that upserting `rows` would replace although their id differs
pub fn displaced_rows(conn: &Connection, table: &str, rows: &[SqlRow]) -> Result<usize> {
    let mut displaced = 0;
    for row in rows {
        let id = text(row, "id");
        let local = match table {
            "file" => match text(row, "path") {
                Some(path) => codec::file_id_at_path(conn, path)?,
                None => None,
            },
            "change" if matches!(row.get("commit_id"), None | Some(SqlValue::Null)) => {
                let key = match (
                    text(row, "file_id"),
                    text(row, "plugin_key"),
                    text(row, "type"),
                    text(row, "entity_id"),
                ) {
                    (Some(file_id), Some(plugin_key), Some(entity_type), Some(entity_id)) => EntityKey {
                        file_id: file_id.to_string(),
                        plugin_key: plugin_key.to_string(),
                        entity_type: entity_type.to_string(),
                        entity_id: entity_id.to_string(),
                    },
                    _ => continue,
                };
                codec::uncommitted_change(conn, &key)?.map(|change| change.id)
            }
            _ => None,
        };
        if local.is_some_and(|local| Some(local.as_str()) != id) {
            displaced += 1;
        }
    }
    Ok(displaced)
}
