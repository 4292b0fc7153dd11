//! File store write API
//!
//! Every write appends exactly one queue entry and wakes the worker. Reads see
//! the newest pending entry of a file before the materialised row, so a caller
//! reads its own writes without waiting for [`Lix::settled`].

use rusqlite::Connection;
use serde_json::Value;

use crate::database::codec;
use crate::error::{LixError, Result};
use crate::lix::Lix;
use crate::schema::{LixFile, normalize_path};

/// Current state of a file: pending write first, then the file row.
/// `None` when the file does not exist or a pending write deletes it.
pub(crate) fn current_file(conn: &Connection, id: &str) -> Result<Option<LixFile>> {
    match codec::latest_queue_entry(conn, id)? {
        Some(entry) => Ok(entry.to_file()),
        None => codec::get_file(conn, id),
    }
}

/// All current files, ordered by path
pub(crate) fn current_files(conn: &Connection) -> Result<Vec<LixFile>> {
    let pending = codec::latest_queue_entries(conn)?;
    let mut files: Vec<LixFile> = codec::list_files(conn)?
        .into_iter()
        .filter(|file| !pending.iter().any(|entry| entry.file_id == file.id))
        .collect();
    files.extend(pending.iter().filter_map(|entry| entry.to_file()));
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn require_file(conn: &Connection, id: &str) -> Result<LixFile> {
    current_file(conn, id)?.ok_or_else(|| LixError::FileNotFound(id.to_string()))
}

impl Lix {
    /// Insert a new file.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::FileAlreadyExists`] if the id or path is taken.
    pub async fn insert_file(&self, file: LixFile) -> Result<LixFile> {
        let file = LixFile {
            path: normalize_path(&file.path),
            ..file
        };
        let inserted = file.clone();
        self.db
            .transaction(move |tx| {
                if current_file(tx, &file.id)?.is_some() {
                    return Err(LixError::FileAlreadyExists(file.id.clone()));
                }
                if current_files(tx)?.iter().any(|f| f.path == file.path) {
                    return Err(LixError::FileAlreadyExists(file.path.clone()));
                }
                codec::enqueue(tx, &file.id, &file.path, Some(&file.data), &file.metadata)?;
                Ok(())
            })
            .await?;

        tracing::debug!(file_id = %inserted.id, path = %inserted.path, "Queued file insert");
        self.trigger_queue();
        Ok(inserted)
    }

    /// Replace the bytes of a file
    pub async fn update_file(&self, id: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let id = id.to_string();
        let data = data.into();
        self.db
            .transaction(|tx| {
                let file = require_file(tx, &id)?;
                codec::enqueue(tx, &file.id, &file.path, Some(&data), &file.metadata)?;
                Ok(())
            })
            .await?;

        tracing::debug!(file_id = %id, "Queued file update");
        self.trigger_queue();
        Ok(())
    }

    /// Replace the metadata of a file, keeping its bytes
    pub async fn update_file_metadata(&self, id: &str, metadata: Option<Value>) -> Result<()> {
        let id = id.to_string();
        self.db
            .transaction(|tx| {
                let file = require_file(tx, &id)?;
                codec::enqueue(tx, &file.id, &file.path, Some(&file.data), &metadata)?;
                Ok(())
            })
            .await?;

        self.trigger_queue();
        Ok(())
    }

    /// Delete a file; its entities are recorded as deleted
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .transaction(|tx| {
                let file = require_file(tx, &id)?;
                codec::enqueue(tx, &file.id, &file.path, None, &file.metadata)?;
                Ok(())
            })
            .await?;

        tracing::debug!(file_id = %id, "Queued file delete");
        self.trigger_queue();
        Ok(())
    }

    pub async fn file(&self, id: &str) -> Result<Option<LixFile>> {
        let id = id.to_string();
        self.db.read(move |conn| current_file(conn, &id)).await
    }

    pub async fn file_by_path(&self, path: &str) -> Result<Option<LixFile>> {
        let path = normalize_path(path);
        self.db
            .read(move |conn| {
                Ok(current_files(conn)?
                    .into_iter()
                    .find(|file| file.path == path))
            })
            .await
    }

    pub async fn files(&self) -> Result<Vec<LixFile>> {
        self.db.read(current_files).await
    }

    /// Messages of the current files, through the configured message plugins
    pub async fn load_messages(&self) -> Result<Vec<Value>> {
        let files = self.files().await?;
        self.plugins.load_messages(&files)
    }

    /// Render `messages` into files and write the ones that changed
    pub async fn save_messages(&self, messages: &[Value]) -> Result<Vec<LixFile>> {
        let files = self.files().await?;
        let saved = self.plugins.save_messages(messages, &files)?;

        for file in &saved {
            let path = normalize_path(&file.path);
            match files.iter().find(|existing| existing.path == path) {
                Some(existing) if existing.data == file.data => {}
                Some(existing) => self.update_file(&existing.id, file.data.clone()).await?,
                None => {
                    self.insert_file(file.clone()).await?;
                }
            }
        }
        Ok(saved)
    }
}
