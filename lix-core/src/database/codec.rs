//! Row codec between SQLite rows and domain types
//!
//! JSON columns (`value`, `meta`, `metadata`) are decoded here and nowhere
//! else. Everything above this module works with typed values.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::schema::{
    Branch, Change, ChangeFilter, ChangeQueueEntry, Commit, Conflict, EntityKey, LixFile,
};

pub const CHANGE_COLUMNS: &str =
    "id, parent_id, type, file_id, plugin_key, operation, value, meta, commit_id, created_at";
pub const COMMIT_COLUMNS: &str = "id, parent_id, user_id, description, created_at";
pub const BRANCH_COLUMNS: &str = "id, name, commit_id, active";
pub const CONFLICT_COLUMNS: &str =
    "change_id, conflicting_change_id, branch_id, reason, meta, resolved_with_change_id";
pub const FILE_COLUMNS: &str = "id, path, data, metadata";
pub const QUEUE_COLUMNS: &str = "id, file_id, path, data, metadata";

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Decode a required JSON column
fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Decode a nullable JSON column
fn optional_json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Encode a JSON column
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Encode a nullable JSON column
pub fn to_optional_json(value: &Option<Value>) -> Result<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

pub fn change_from_row(row: &Row<'_>) -> rusqlite::Result<Change> {
    let operation: String = row.get(5)?;
    Ok(Change {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        entity_type: row.get(2)?,
        file_id: row.get(3)?,
        plugin_key: row.get(4)?,
        operation: operation.parse().map_err(|e| conversion_error(5, e))?,
        value: json_column(row, 6)?,
        meta: optional_json_column(row, 7)?,
        commit_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        user_id: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        commit_id: row.get(2)?,
        active: row.get(3)?,
    })
}

pub fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    Ok(Conflict {
        change_id: row.get(0)?,
        conflicting_change_id: row.get(1)?,
        branch_id: row.get(2)?,
        reason: row.get(3)?,
        meta: optional_json_column(row, 4)?,
        resolved_with_change_id: row.get(5)?,
    })
}

pub fn file_from_row(row: &Row<'_>) -> rusqlite::Result<LixFile> {
    Ok(LixFile {
        id: row.get(0)?,
        path: row.get(1)?,
        data: row.get(2)?,
        metadata: optional_json_column(row, 3)?,
    })
}

pub fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeQueueEntry> {
    Ok(ChangeQueueEntry {
        id: row.get(0)?,
        file_id: row.get(1)?,
        path: row.get(2)?,
        data: row.get(3)?,
        metadata: optional_json_column(row, 4)?,
    })
}

// Change rows

pub fn insert_change(conn: &Connection, change: &Change) -> Result<()> {
    conn.execute(
        "INSERT INTO change (id, parent_id, type, file_id, plugin_key, entity_id, operation, value, meta, commit_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            change.id,
            change.parent_id,
            change.entity_type,
            change.file_id,
            change.plugin_key,
            change.value.id,
            change.operation.as_str(),
            to_json(&change.value)?,
            to_optional_json(&change.meta)?,
            change.commit_id,
            change.created_at,
        ],
    )?;
    Ok(())
}

/// Overwrite value, operation and meta of an uncommitted change
pub fn update_uncommitted_change(conn: &Connection, change: &Change) -> Result<()> {
    conn.execute(
        "UPDATE change SET operation = ?2, value = ?3, meta = ?4 WHERE id = ?1 AND commit_id IS NULL",
        params![
            change.id,
            change.operation.as_str(),
            to_json(&change.value)?,
            to_optional_json(&change.meta)?,
        ],
    )?;
    Ok(())
}

pub fn delete_change(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM change WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn get_change(conn: &Connection, id: &str) -> Result<Option<Change>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM change WHERE id = ?1", CHANGE_COLUMNS),
            params![id],
            change_from_row,
        )
        .optional()?)
}

pub fn change_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM change WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// The working change of an entity, if any
pub fn uncommitted_change(conn: &Connection, key: &EntityKey) -> Result<Option<Change>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM change WHERE file_id = ?1 AND plugin_key = ?2 AND type = ?3 \
                 AND entity_id = ?4 AND commit_id IS NULL",
                CHANGE_COLUMNS
            ),
            params![key.file_id, key.plugin_key, key.entity_type, key.entity_id],
            change_from_row,
        )
        .optional()?)
}

pub fn uncommitted_changes(conn: &Connection) -> Result<Vec<Change>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM change WHERE commit_id IS NULL ORDER BY created_at, id",
        CHANGE_COLUMNS
    ))?;
    let changes = stmt
        .query_map([], change_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(changes)
}

pub fn list_changes(conn: &Connection, filter: &ChangeFilter) -> Result<Vec<Change>> {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if let Some(file_id) = &filter.file_id {
        args.push(file_id.clone());
        clauses.push(format!("file_id = ?{}", args.len()));
    }
    if let Some(commit_id) = &filter.commit_id {
        args.push(commit_id.clone());
        clauses.push(format!("commit_id = ?{}", args.len()));
    }
    if filter.uncommitted {
        clauses.push("commit_id IS NULL".to_string());
    }
    let condition = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM change {} ORDER BY created_at, id",
        CHANGE_COLUMNS, condition
    ))?;
    let changes = stmt
        .query_map(params_from_iter(args), change_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(changes)
}

pub fn count_uncommitted(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM change WHERE commit_id IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// Commit rows

pub fn insert_commit(conn: &Connection, commit: &Commit) -> Result<()> {
    conn.execute(
        "INSERT INTO \"commit\" (id, parent_id, user_id, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            commit.id,
            commit.parent_id,
            commit.user_id,
            commit.description,
            commit.created_at
        ],
    )?;
    Ok(())
}

pub fn get_commit(conn: &Connection, id: &str) -> Result<Option<Commit>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM \"commit\" WHERE id = ?1", COMMIT_COLUMNS),
            params![id],
            commit_from_row,
        )
        .optional()?)
}

// Branch rows

pub fn active_branch(conn: &Connection) -> Result<Option<Branch>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM branch WHERE active = 1", BRANCH_COLUMNS),
            [],
            branch_from_row,
        )
        .optional()?)
}

pub fn branch_by_id(conn: &Connection, id: &str) -> Result<Option<Branch>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM branch WHERE id = ?1", BRANCH_COLUMNS),
            params![id],
            branch_from_row,
        )
        .optional()?)
}

pub fn branch_by_name(conn: &Connection, name: &str) -> Result<Option<Branch>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM branch WHERE name = ?1", BRANCH_COLUMNS),
            params![name],
            branch_from_row,
        )
        .optional()?)
}

pub fn list_branches(conn: &Connection) -> Result<Vec<Branch>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM branch ORDER BY name",
        BRANCH_COLUMNS
    ))?;
    let branches = stmt
        .query_map([], branch_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(branches)
}

pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<()> {
    conn.execute(
        "INSERT INTO branch (id, name, commit_id, active) VALUES (?1, ?2, ?3, ?4)",
        params![branch.id, branch.name, branch.commit_id, branch.active],
    )?;
    Ok(())
}

pub fn delete_branch(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM branch WHERE id = ?1", params![id])?;
    Ok(())
}

/// Make `id` the only active branch
pub fn set_active_branch(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("UPDATE branch SET active = 0 WHERE active = 1", [])?;
    conn.execute("UPDATE branch SET active = 1 WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn set_branch_head(conn: &Connection, branch_id: &str, commit_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE branch SET commit_id = ?2 WHERE id = ?1",
        params![branch_id, commit_id],
    )?;
    Ok(())
}

// Conflict rows

/// Insert a conflict unless the pair is already recorded. Returns whether a row was added.
pub fn insert_conflict(conn: &Connection, conflict: &Conflict) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conflict (change_id, conflicting_change_id, branch_id, reason, meta, resolved_with_change_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            conflict.change_id,
            conflict.conflicting_change_id,
            conflict.branch_id,
            conflict.reason,
            to_optional_json(&conflict.meta)?,
            conflict.resolved_with_change_id,
        ],
    )?;
    Ok(inserted > 0)
}

pub fn get_conflict(
    conn: &Connection,
    change_id: &str,
    conflicting_change_id: &str,
) -> Result<Option<Conflict>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM conflict WHERE change_id = ?1 AND conflicting_change_id = ?2",
                CONFLICT_COLUMNS
            ),
            params![change_id, conflicting_change_id],
            conflict_from_row,
        )
        .optional()?)
}

pub fn set_conflict_resolution(
    conn: &Connection,
    change_id: &str,
    conflicting_change_id: &str,
    resolved_with: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conflict SET resolved_with_change_id = ?3 WHERE change_id = ?1 AND conflicting_change_id = ?2",
        params![change_id, conflicting_change_id, resolved_with],
    )?;
    Ok(())
}

pub fn list_conflicts(conn: &Connection, unresolved_only: bool) -> Result<Vec<Conflict>> {
    let condition = if unresolved_only {
        "WHERE resolved_with_change_id IS NULL"
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conflict {} ORDER BY change_id, conflicting_change_id",
        CONFLICT_COLUMNS, condition
    ))?;
    let conflicts = stmt
        .query_map([], conflict_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(conflicts)
}

// File rows

pub fn get_file(conn: &Connection, id: &str) -> Result<Option<LixFile>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM file WHERE id = ?1", FILE_COLUMNS),
            params![id],
            file_from_row,
        )
        .optional()?)
}

pub fn list_files(conn: &Connection) -> Result<Vec<LixFile>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM file ORDER BY path", FILE_COLUMNS))?;
    let files = stmt
        .query_map([], file_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

pub fn upsert_file(conn: &Connection, file: &LixFile) -> Result<()> {
    conn.execute(
        "INSERT INTO file (id, path, data, metadata) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (id) DO UPDATE SET path = excluded.path, data = excluded.data, metadata = excluded.metadata",
        params![
            file.id,
            file.path,
            file.data,
            to_optional_json(&file.metadata)?
        ],
    )?;
    Ok(())
}

pub fn write_file_data(conn: &Connection, id: &str, data: &[u8]) -> Result<()> {
    conn.execute("UPDATE file SET data = ?2 WHERE id = ?1", params![id, data])?;
    Ok(())
}

pub fn delete_file(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM file WHERE id = ?1", params![id])?;
    Ok(())
}

/// Last path and metadata stored for `id`, with empty data. Survives deletion of the row.
pub fn last_known_file(conn: &Connection, id: &str) -> Result<Option<LixFile>> {
    Ok(conn
        .query_row(
            "SELECT file_id, path, x'', metadata FROM file_path WHERE file_id = ?1",
            params![id],
            file_from_row,
        )
        .optional()?)
}

pub fn file_id_at_path(conn: &Connection, path: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT id FROM file WHERE path = ?1", params![path], |row| row.get(0))
        .optional()?)
}

// Queue rows

pub fn enqueue(
    conn: &Connection,
    file_id: &str,
    path: &str,
    data: Option<&[u8]>,
    metadata: &Option<Value>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO change_queue (file_id, path, data, metadata) VALUES (?1, ?2, ?3, ?4)",
        params![file_id, path, data, to_optional_json(metadata)?],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest pending entry
pub fn next_queue_entry(conn: &Connection) -> Result<Option<ChangeQueueEntry>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM change_queue ORDER BY id ASC LIMIT 1",
                QUEUE_COLUMNS
            ),
            [],
            queue_entry_from_row,
        )
        .optional()?)
}

/// Newest pending entry per file, in file order
pub fn latest_queue_entries(conn: &Connection) -> Result<Vec<ChangeQueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM change_queue WHERE id IN (SELECT MAX(id) FROM change_queue GROUP BY file_id) ORDER BY id",
        QUEUE_COLUMNS
    ))?;
    let entries = stmt
        .query_map([], queue_entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn latest_queue_entry(conn: &Connection, file_id: &str) -> Result<Option<ChangeQueueEntry>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM change_queue WHERE file_id = ?1 ORDER BY id DESC LIMIT 1",
                QUEUE_COLUMNS
            ),
            params![file_id],
            queue_entry_from_row,
        )
        .optional()?)
}

pub fn dequeue(conn: &Connection, entry_id: i64) -> Result<()> {
    conn.execute("DELETE FROM change_queue WHERE id = ?1", params![entry_id])?;
    Ok(())
}

pub fn queue_len(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_queue", [], |row| row.get(0))?;
    Ok(count as usize)
}

// key_value

pub fn get_key_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM key_value WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_key_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO key_value (key, value) VALUES (?1, ?2) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
