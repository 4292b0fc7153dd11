//! Error types for lix operations

/// Result type for lix operations
pub type Result<T> = std::result::Result<T, LixError>;

/// Error types for the lix engine
#[derive(Debug, thiserror::Error)]
pub enum LixError {
    /// Plugin set is invalid (duplicate keys, mixed message modes, bad glob)
    #[error("Plugin configuration error: {0}")]
    PluginConfiguration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A plugin failed while diffing or applying changes
    #[error("Plugin '{key}' failed: {message}")]
    Plugin { key: String, message: String },

    /// No plugin with the given key is loaded
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The selected change is neither side of the conflict
    #[error("Selected change {selected} is not part of conflict {change_id} <-> {conflicting_change_id}")]
    SelectedChangeNotInConflict {
        selected: String,
        change_id: String,
        conflicting_change_id: String,
    },

    /// A resolving change must be a direct child of the conflict's change
    #[error("Change {change_id} is not a direct child of conflicting change {expected_parent}")]
    ChangeNotDirectChildOfConflict {
        change_id: String,
        expected_parent: String,
    },

    /// A resolving change targets a different file than the conflict
    #[error("Change {change_id} belongs to file {file_id}, conflict is on file {expected_file_id}")]
    ChangeDoesNotBelongToFile {
        change_id: String,
        file_id: String,
        expected_file_id: String,
    },

    /// A resolving change was already persisted
    #[error("Change already exists: {0}")]
    ChangeAlreadyExists(String),

    /// File lookup failed
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A file with the same id or path exists
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    /// Change lookup failed
    #[error("Change not found: {0}")]
    ChangeNotFound(String),

    /// Commit lookup failed
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// Branch lookup failed
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// Branch name is taken
    #[error("Branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// The active branch cannot be deleted
    #[error("Cannot delete the active branch: {0}")]
    CannotDeleteActiveBranch(String),

    /// Conflict lookup failed
    #[error("Conflict not found: {change_id} <-> {conflicting_change_id}")]
    ConflictNotFound {
        change_id: String,
        conflicting_change_id: String,
    },

    /// Conflicts are resolved on the branch they were recorded for
    #[error("Conflict belongs to branch {branch_id}, which is not active")]
    ConflictBranchNotActive { branch_id: String },

    /// Operation requires a clean working state
    #[error("{0} uncommitted change(s) on the active branch")]
    UncommittedChanges(usize),

    /// The change queue worker has stopped
    #[error("Change queue worker stopped")]
    QueueStopped,

    /// Another process holds the store
    #[error("Store is locked by another process: {0}")]
    StoreLocked(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sync server rejected a request
    #[error("Server responded with {status}: {message}")]
    Server { status: u16, message: String },

    /// Table is not part of the replicated schema
    #[error("Table cannot be synced: {0}")]
    InvalidTable(String),

    /// Remote lix lookup failed
    #[error("Lix not found: {0}")]
    LixNotFound(String),

    /// Remote lix is already registered
    #[error("Lix already exists: {0}")]
    LixAlreadyExists(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LixError {
    /// Build a plugin failure for the plugin with the given key
    pub fn plugin(key: impl Into<String>, message: impl Into<String>) -> Self {
        LixError::Plugin {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the error is one of the resolver's input validation failures
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LixError::SelectedChangeNotInConflict { .. }
                | LixError::ChangeNotDirectChildOfConflict { .. }
                | LixError::ChangeDoesNotBelongToFile { .. }
                | LixError::ChangeAlreadyExists(_)
        )
    }
}

impl From<String> for LixError {
    fn from(s: String) -> Self {
        LixError::Other(s)
    }
}

impl From<&str> for LixError {
    fn from(s: &str) -> Self {
        LixError::Other(s.to_string())
    }
}
