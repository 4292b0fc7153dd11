//! SQLite backing store
//!
//! One [`Database`] wraps one connection. All access goes through
//! [`Database::read`] and [`Database::transaction`], which run synchronous
//! closures while holding the connection, so no transaction ever spans an
//! await point.
//!
//! Closures block the calling thread, plugin diffing and rendering included.
//! On a multi-threaded runtime the worker is handed off with
//! [`tokio::task::block_in_place`] while they run; a current-thread runtime
//! stalls until they return.

pub mod codec;
pub mod lock;

use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OptionalExtension, Transaction, params};
use std::path::Path;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::schema::{DEFAULT_BRANCH, LIX_ID_KEY, ROOT_COMMIT_ID, new_id};

pub use lock::StoreLock;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS key_value (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
) STRICT;

CREATE TABLE IF NOT EXISTS file (
    id TEXT PRIMARY KEY NOT NULL,
    path TEXT NOT NULL UNIQUE,
    data BLOB NOT NULL,
    metadata TEXT
) STRICT;

-- Last path and metadata of every file id ever stored, kept after the row goes
CREATE TABLE IF NOT EXISTS file_path (
    file_id TEXT PRIMARY KEY NOT NULL,
    path TEXT NOT NULL,
    metadata TEXT
) STRICT;

CREATE TRIGGER IF NOT EXISTS file_path_after_insert AFTER INSERT ON file
BEGIN
    INSERT OR REPLACE INTO file_path (file_id, path, metadata) VALUES (NEW.id, NEW.path, NEW.metadata);
END;

CREATE TRIGGER IF NOT EXISTS file_path_after_update AFTER UPDATE OF path, metadata ON file
BEGIN
    INSERT OR REPLACE INTO file_path (file_id, path, metadata) VALUES (NEW.id, NEW.path, NEW.metadata);
END;

INSERT OR IGNORE INTO file_path (file_id, path, metadata) SELECT id, path, metadata FROM file;

CREATE TABLE IF NOT EXISTS change_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id TEXT NOT NULL,
    path TEXT NOT NULL,
    data BLOB,
    metadata TEXT
) STRICT;

CREATE TABLE IF NOT EXISTS change (
    id TEXT PRIMARY KEY NOT NULL,
    parent_id TEXT,
    type TEXT NOT NULL,
    file_id TEXT NOT NULL,
    plugin_key TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
    value TEXT NOT NULL,
    meta TEXT,
    commit_id TEXT,
    created_at TEXT NOT NULL
) STRICT;

CREATE UNIQUE INDEX IF NOT EXISTS change_uncommitted_entity
    ON change (file_id, plugin_key, type, entity_id)
    WHERE commit_id IS NULL;

CREATE INDEX IF NOT EXISTS change_entity
    ON change (file_id, plugin_key, type, entity_id);

CREATE INDEX IF NOT EXISTS change_commit ON change (commit_id);

CREATE TABLE IF NOT EXISTS "commit" (
    id TEXT PRIMARY KEY NOT NULL,
    parent_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
) STRICT;

CREATE TABLE IF NOT EXISTS branch (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    commit_id TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 0 CHECK (active IN (0, 1))
) STRICT;

CREATE UNIQUE INDEX IF NOT EXISTS branch_single_active
    ON branch (active)
    WHERE active = 1;

CREATE TABLE IF NOT EXISTS conflict (
    change_id TEXT NOT NULL,
    conflicting_change_id TEXT NOT NULL,
    branch_id TEXT NOT NULL,
    reason TEXT,
    meta TEXT,
    resolved_with_change_id TEXT,
    PRIMARY KEY (change_id, conflicting_change_id)
) STRICT;
"#;

/// Handle to one lix store
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a fresh in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    /// Open or create a store on disk
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Restore a store serialized with [`Database::to_blob`] into memory
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("restore.lix");
        std::fs::write(&path, blob)?;

        let mut conn = Connection::open_in_memory()?;
        conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read-only closure against the connection
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let conn = self.conn.lock().await;
        blocking(|| f(&conn))
    }

    /// Run a closure inside one transaction; commits on `Ok`, rolls back on `Err`
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send,
        T: Send,
    {
        let mut conn = self.conn.lock().await;
        blocking(|| -> Result<T> {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Serialize the whole store into a SQLite database image
    pub async fn to_blob(&self) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.lix");
        {
            let conn = self.conn.lock().await;
            blocking(|| conn.backup(DatabaseName::Main, &path, None))?;
        }
        Ok(std::fs::read(&path)?)
    }
}

fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Create tables and seed a fresh store with an id and the default branch
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let has_id: Option<String> = conn
        .query_row(
            "SELECT value FROM key_value WHERE key = ?1",
            params![LIX_ID_KEY],
            |row| row.get(0),
        )
        .optional()?;
    if has_id.is_none() {
        conn.execute(
            "INSERT INTO key_value (key, value) VALUES (?1, ?2)",
            params![LIX_ID_KEY, new_id()],
        )?;
    }

    let branches: i64 = conn.query_row("SELECT COUNT(*) FROM branch", [], |row| row.get(0))?;
    if branches == 0 {
        conn.execute(
            "INSERT INTO branch (id, name, commit_id, active) VALUES (?1, ?2, ?3, 1)",
            params![new_id(), DEFAULT_BRANCH, ROOT_COMMIT_ID],
        )?;
    }
    Ok(())
}

/// Blob of a freshly seeded, empty lix
pub async fn new_lix_file() -> Result<Vec<u8>> {
    Database::open_in_memory()?.to_blob().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_store_is_seeded() {
        let db = Database::open_in_memory().unwrap();
        let (id, branches) = db
            .read(|conn| {
                let id: String = conn.query_row(
                    "SELECT value FROM key_value WHERE key = 'lix-id'",
                    [],
                    |row| row.get(0),
                )?;
                let branches: Vec<(String, String, i64)> = conn
                    .prepare("SELECT name, commit_id, active FROM branch")?
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                Ok((id, branches))
            })
            .await
            .unwrap();

        assert_eq!(id.len(), 36);
        assert_eq!(
            branches,
            vec![(DEFAULT_BRANCH.to_string(), ROOT_COMMIT_ID.to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_blob_roundtrip_keeps_identity() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO key_value (key, value) VALUES ('mock-key', 'mock-value')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let blob = db.to_blob().await.unwrap();
        let restored = Database::from_blob(&blob).unwrap();

        let query = |conn: &Connection| -> Result<(String, String)> {
            Ok(conn.query_row(
                "SELECT (SELECT value FROM key_value WHERE key = 'lix-id'), \
                 (SELECT value FROM key_value WHERE key = 'mock-key')",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        };
        let original = db.read(query).await.unwrap();
        let copy = restored.read(query).await.unwrap();
        assert_eq!(original, copy);
        assert_eq!(copy.1, "mock-value");
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO key_value (key, value) VALUES ('k', 'v')",
                    [],
                )?;
                Err(crate::error::LixError::Other("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM key_value WHERE key = 'k'", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_store_work_on_multi_thread_runtime() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let db = db.clone();
                tokio::spawn(async move {
                    db.transaction(move |tx| {
                        tx.execute(
                            "INSERT INTO key_value (key, value) VALUES (?1, 'v')",
                            params![format!("k{}", i)],
                        )?;
                        Ok(())
                    })
                    .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM key_value WHERE value = 'v'", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(count, 4);
        assert!(!db.to_blob().await.unwrap().is_empty());
    }

    #[test]
    fn test_file_path_outlives_file_row() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO file (id, path, data) VALUES ('f1', '/a.txt', x'00')",
            [],
        )
        .unwrap();
        conn.execute("UPDATE file SET path = '/b.txt' WHERE id = 'f1'", []).unwrap();
        conn.execute("DELETE FROM file WHERE id = 'f1'", []).unwrap();

        let known = codec::last_known_file(&conn, "f1").unwrap().unwrap();
        assert_eq!(known.path, "/b.txt");
        assert!(known.data.is_empty());
        assert!(codec::last_known_file(&conn, "f2").unwrap().is_none());
    }

    #[test]
    fn test_single_active_branch_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO branch (id, name, commit_id, active) VALUES ('b2', 'other', ?1, 1)",
            params![ROOT_COMMIT_ID],
        );
        assert!(err.is_err());
    }
}
