//! # Lix - change control for any file format
//!
//! Lix tracks edits to files at the granularity of typed entities (a cell, a
//! message, a line) instead of whole-file diffs:
//! - File writes are queued and turned into change records by plugins
//! - Commits freeze the working changes of the active branch
//! - Branches can be switched, merged and fast-forwarded
//! - Diverging edits are detected as conflicts and resolved explicitly
//! - Table rows replicate to a server over a small SQL-over-HTTP protocol
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lix_core::prelude::*;
//!
//! # async fn run(plugin: std::sync::Arc<dyn LixPlugin>) -> Result<()> {
//! let lix = Lix::open_in_memory(vec![plugin]).await?;
//!
//! lix.insert_file(LixFile::new("/data.csv", "a,b\n1,2\n")).await?;
//! lix.settled().await?;
//! lix.commit("alice", "initial import").await?;
//!
//! lix.create_branch("review", None).await?;
//! lix.switch_branch("review").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **File store**: [`Lix::insert_file`] and friends append to the change queue
//! - **Change queue**: one worker task drains the queue through the matching
//!   [`plugin::LixPlugin`]s into change rows
//! - **Versioning**: commits, branches, merges and conflict resolution
//! - **Sync**: [`sync::SyncClient`] and the framework-free [`sync::LspHandler`]

pub mod config;
pub mod database;
pub mod error;
pub mod files;
pub mod lix;
pub mod plugin;
pub mod queue;
pub mod schema;
pub mod sync;
pub mod versioning;

#[cfg(test)]
pub(crate) mod testing;

pub use lix::Lix;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigBuilder, LixConfig, QueueConfig, StorageConfig, SyncConfig};
    pub use crate::error::{LixError, Result};
    pub use crate::lix::Lix;
    pub use crate::plugin::{
        DiffReport, ImportExportFiles, LixPlugin, LoadSaveMessages, PluginKind, PluginRegistry,
    };
    pub use crate::schema::{
        Branch, BranchRef, Change, ChangeFilter, Commit, Conflict, EntityKey, EntitySnapshot,
        LixFile, NewChange, Operation, DEFAULT_BRANCH, ROOT_COMMIT_ID,
    };
    pub use crate::sync::{
        LspHandler, LspStorage, MemoryLspStorage, QueryRequest, QueryResponse, SqlValue,
        SyncClient,
    };
    pub use crate::versioning::{MergeOutcome, MergeReport};
}
