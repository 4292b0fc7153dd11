//! The lix engine handle
//!
//! A [`Lix`] owns one store, the validated plugin set and the change queue
//! worker. File writes, commits, branch operations, merges and conflict
//! resolution are methods on this handle, spread over the modules that
//! implement them.

use std::sync::Arc;

use crate::config::LixConfig;
use crate::database::{Database, StoreLock, codec};
use crate::error::{LixError, Result};
use crate::plugin::{LixPlugin, PluginRegistry};
use crate::queue::ChangeQueue;
use crate::schema::LIX_ID_KEY;

/// An open lix
pub struct Lix {
    pub(crate) db: Arc<Database>,
    pub(crate) plugins: Arc<PluginRegistry>,
    queue: ChangeQueue,
    config: LixConfig,
    _lock: Option<StoreLock>,
}

impl Lix {
    /// Open a fresh lix in memory.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::PluginConfiguration`] if the plugin set is invalid.
    pub async fn open_in_memory(plugins: Vec<Arc<dyn LixPlugin>>) -> Result<Self> {
        Self::open(LixConfig::default(), plugins).await
    }

    /// Open the lix described by `config`, creating it if needed.
    ///
    /// On-disk stores take an exclusive lock for the lifetime of the handle
    /// unless `storage.lock` is disabled.
    ///
    /// # Arguments
    ///
    /// * `config` - Store, queue and sync settings
    /// * `plugins` - Diff plugins for this lix
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or plugin set is invalid, the
    /// store is locked by another process, or the store cannot be opened.
    pub async fn open(config: LixConfig, plugins: Vec<Arc<dyn LixPlugin>>) -> Result<Self> {
        config.validate()?;
        let registry = PluginRegistry::new(plugins)?;

        let (db, lock) = match &config.storage.path {
            Some(path) => {
                let lock = if config.storage.lock {
                    Some(StoreLock::acquire(path)?)
                } else {
                    None
                };
                (Database::open(path)?, lock)
            }
            None => (Database::open_in_memory()?, None),
        };

        Ok(Self::start(db, registry, config, lock))
    }

    /// Open an in-memory lix from a blob produced by [`Lix::to_blob`]
    pub async fn open_from_blob(
        blob: &[u8],
        plugins: Vec<Arc<dyn LixPlugin>>,
        config: LixConfig,
    ) -> Result<Self> {
        config.validate()?;
        let registry = PluginRegistry::new(plugins)?;
        let db = Database::from_blob(blob)?;
        Ok(Self::start(db, registry, config, None))
    }

    fn start(db: Database, plugins: PluginRegistry, config: LixConfig, lock: Option<StoreLock>) -> Self {
        let db = Arc::new(db);
        let plugins = Arc::new(plugins);
        let queue = ChangeQueue::spawn(db.clone(), plugins.clone(), &config.queue);

        tracing::info!(
            path = ?config.storage.path,
            plugins = plugins.len(),
            "Opened lix"
        );

        Self {
            db,
            plugins,
            queue,
            config,
            _lock: lock,
        }
    }

    /// Id of this lix, stable across blob round-trips
    pub async fn id(&self) -> Result<String> {
        self.db
            .read(|conn| {
                codec::get_key_value(conn, LIX_ID_KEY)?
                    .ok_or_else(|| LixError::Other("lix-id missing from key_value".to_string()))
            })
            .await
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn config(&self) -> &LixConfig {
        &self.config
    }

    /// Wait until every file write issued so far has been turned into changes
    pub async fn settled(&self) -> Result<()> {
        self.queue.settled().await
    }

    /// Wake the queue worker after enqueueing
    pub(crate) fn trigger_queue(&self) {
        self.queue.trigger();
    }

    /// Serialize the whole store after pending writes are materialized
    pub async fn to_blob(&self) -> Result<Vec<u8>> {
        self.settled().await?;
        self.db.to_blob().await
    }

    /// Stop the queue worker and release the store
    pub async fn close(self) -> Result<()> {
        self.queue.shutdown().await;
        tracing::info!("Closed lix");
        Ok(())
    }
}
