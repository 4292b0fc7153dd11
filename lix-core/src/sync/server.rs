//! Server side of the sync protocol, independent of any HTTP framework

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::protocol::{NewLixResponse, QueryRequest, QueryResponse, execute_query};
use crate::database::{Database, codec};
use crate::error::{LixError, Result};
use crate::schema::LIX_ID_KEY;

/// Where a server keeps the stores it was sent
#[async_trait]
pub trait LspStorage: Send + Sync {
    /// Store a new lix under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::LixAlreadyExists`] if `id` is taken.
    async fn insert(&self, id: &str, db: Database) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`LixError::LixNotFound`] for an unknown id.
    async fn get(&self, id: &str) -> Result<Arc<Database>>;

    async fn ids(&self) -> Result<Vec<String>>;
}

/// Keeps every registered lix in memory
#[derive(Default)]
pub struct MemoryLspStorage {
    stores: RwLock<HashMap<String, Arc<Database>>>,
}

impl MemoryLspStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LspStorage for MemoryLspStorage {
    async fn insert(&self, id: &str, db: Database) -> Result<()> {
        let mut stores = self.stores.write().await;
        if stores.contains_key(id) {
            return Err(LixError::LixAlreadyExists(id.to_string()));
        }
        stores.insert(id.to_string(), Arc::new(db));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<Database>> {
        self.stores
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LixError::LixNotFound(id.to_string()))
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.stores.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Handles `/lsp/new` and `/lsp/lix/{id}/query`
pub struct LspHandler<S: LspStorage> {
    storage: S,
}

impl<S: LspStorage> LspHandler<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Register a store blob under its own lix id
    pub async fn new_lix(&self, blob: &[u8]) -> Result<NewLixResponse> {
        let db = Database::from_blob(blob)?;
        let id = db
            .read(|conn| {
                codec::get_key_value(conn, LIX_ID_KEY)?
                    .ok_or_else(|| LixError::Other("Uploaded lix has no id".to_string()))
            })
            .await?;

        self.storage.insert(&id, db).await?;
        tracing::info!(id = %id, bytes = blob.len(), "Registered lix");
        Ok(NewLixResponse { id })
    }

    /// Run one statement against a registered lix, in its own transaction
    pub async fn query(&self, id: &str, request: QueryRequest) -> Result<QueryResponse> {
        let db = self.storage.get(id).await?;
        tracing::debug!(id, sql = %request.sql, "Query");
        db.transaction(move |tx| execute_query(tx, &request)).await
    }
}
