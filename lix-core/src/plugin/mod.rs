//! Diff plugin contract
//!
//! A plugin owns one file format. It turns two versions of a file into
//! entity-level [`DiffReport`]s and renders changes back into file bytes.
//! Plugins are injected when a lix is opened and validated once by the
//! [`PluginRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use lix_core::plugin::{LixPlugin, PluginRegistry};
//!
//! let registry = PluginRegistry::new(vec![Arc::new(CsvPlugin::default())])?;
//! for plugin in registry.matching("/data/cities.csv") {
//!     let reports = plugin.diff_file(old.as_ref(), Some(&neu))?;
//! }
//! ```

mod registry;

pub use registry::PluginRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{LixError, Result};
use crate::schema::{Change, EntitySnapshot, LixFile, Operation};

/// One entity-level difference between two file versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<EntitySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neu: Option<EntitySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl DiffReport {
    pub fn create(entity_type: impl Into<String>, neu: EntitySnapshot) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation: Operation::Create,
            old: None,
            neu: Some(neu),
            meta: None,
        }
    }

    pub fn update(entity_type: impl Into<String>, old: EntitySnapshot, neu: EntitySnapshot) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation: Operation::Update,
            old: Some(old),
            neu: Some(neu),
            meta: None,
        }
    }

    pub fn delete(entity_type: impl Into<String>, old: EntitySnapshot) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation: Operation::Delete,
            old: Some(old),
            neu: None,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The value a change records: `neu`, or `old` for deletions
    pub fn value(&self) -> Option<&EntitySnapshot> {
        self.neu.as_ref().or(self.old.as_ref())
    }
}

/// Diff/apply contract implemented per file format
pub trait LixPlugin: Send + Sync {
    /// Unique plugin key, recorded on every change the plugin produces
    fn key(&self) -> &str;

    /// Glob of the paths this plugin handles, relative (`*.csv`)
    fn glob(&self) -> &str;

    /// Entity-level diff between two versions of a file.
    ///
    /// `old` is `None` for a newly inserted file, `neu` is `None` for a
    /// deleted file.
    fn diff_file(&self, old: Option<&LixFile>, neu: Option<&LixFile>) -> Result<Vec<DiffReport>>;

    /// Re-diff a single entity of the given type.
    ///
    /// Used to decide whether a pending edit equals the last committed value.
    /// An empty result means both sides are equal.
    fn diff_entity(
        &self,
        entity_type: &str,
        old: Option<&EntitySnapshot>,
        neu: Option<&EntitySnapshot>,
    ) -> Result<Vec<DiffReport>> {
        let report = match (old, neu) {
            (None, None) => None,
            (None, Some(neu)) => Some(DiffReport::create(entity_type, neu.clone())),
            (Some(old), None) => Some(DiffReport::delete(entity_type, old.clone())),
            (Some(old), Some(neu)) if old == neu => None,
            (Some(old), Some(neu)) => Some(DiffReport::update(entity_type, old.clone(), neu.clone())),
        };
        Ok(report.into_iter().collect())
    }

    /// Render `changes` onto `file` and return the new bytes.
    ///
    /// Must be deterministic: the same changes and file yield the same bytes.
    fn apply_changes(&self, changes: &[Change], file: &LixFile) -> Result<Vec<u8>> {
        let _ = (changes, file);
        Err(LixError::plugin(self.key(), "apply_changes is not supported"))
    }

    /// Message-level mode of the plugin, if it takes part in message loading
    fn kind(&self) -> Option<PluginKind> {
        None
    }
}

/// Whole-document message load/save
pub trait LoadSaveMessages: Send + Sync {
    fn load_messages(&self, files: &[LixFile]) -> Result<Vec<Value>>;

    fn save_messages(&self, messages: &[Value], files: &[LixFile]) -> Result<Vec<LixFile>>;
}

/// File import/export of messages
pub trait ImportExportFiles: Send + Sync {
    fn import_files(&self, files: &[LixFile]) -> Result<Vec<Value>>;

    fn export_files(&self, messages: &[Value]) -> Result<Vec<LixFile>>;
}

/// The two mutually exclusive message modes a plugin set may use
#[derive(Clone)]
pub enum PluginKind {
    Legacy(Arc<dyn LoadSaveMessages>),
    ImportExport(Arc<dyn ImportExportFiles>),
}

impl PluginKind {
    pub fn is_legacy(&self) -> bool {
        matches!(self, PluginKind::Legacy(_))
    }
}

impl std::fmt::Debug for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Legacy(_) => f.write_str("Legacy"),
            PluginKind::ImportExport(_) => f.write_str("ImportExport"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl LixPlugin for Noop {
        fn key(&self) -> &str {
            "noop"
        }

        fn glob(&self) -> &str {
            "*"
        }

        fn diff_file(&self, _old: Option<&LixFile>, _neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_default_entity_diff() {
        let plugin = Noop;
        let a = EntitySnapshot::new("e").with("text", "a");
        let b = EntitySnapshot::new("e").with("text", "b");

        assert!(plugin.diff_entity("t", Some(&a), Some(&a)).unwrap().is_empty());
        assert!(plugin.diff_entity("t", None, None).unwrap().is_empty());

        let reports = plugin.diff_entity("t", Some(&a), Some(&b)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].operation, Operation::Update);

        let reports = plugin.diff_entity("t", Some(&a), None).unwrap();
        assert_eq!(reports[0].operation, Operation::Delete);
        assert_eq!(reports[0].value(), Some(&a));
    }

    #[test]
    fn test_apply_unsupported_by_default() {
        let file = LixFile::with_id("f", "a.txt", b"x".to_vec());
        let err = Noop.apply_changes(&[], &file).unwrap_err();
        assert!(matches!(err, LixError::Plugin { ref key, .. } if key == "noop"));
    }
}
