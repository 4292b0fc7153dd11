//! Domain types of the change-control model
//!
//! Files are mutated through the write API and queued; the materializer turns
//! queue entries into [`Change`] rows; commits freeze changes and branches
//! point into the commit chain. [`Conflict`]s link diverging leaf changes of
//! two branches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::LixError;

/// Parent id of the first commit and the head of a branch without commits
pub const ROOT_COMMIT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Name of the branch a fresh lix starts on
pub const DEFAULT_BRANCH: &str = "main";

/// Key under which every lix stores its id in `key_value`
pub const LIX_ID_KEY: &str = "lix-id";

/// Generate a new random id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Paths are stored with a leading `/`
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// A tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LixFile {
    pub id: String,
    pub path: String,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LixFile {
    /// Create a file with a random id
    pub fn new(path: impl AsRef<str>, data: impl Into<Vec<u8>>) -> Self {
        Self::with_id(new_id(), path, data)
    }

    /// Create a file with a caller-chosen id
    pub fn with_id(id: impl Into<String>, path: impl AsRef<str>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            path: normalize_path(path.as_ref()),
            data: data.into(),
            metadata: None,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A pending file mutation. `data == None` deletes the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeQueueEntry {
    pub id: i64,
    pub file_id: String,
    pub path: String,
    pub data: Option<Vec<u8>>,
    pub metadata: Option<Value>,
}

impl ChangeQueueEntry {
    /// The file state this entry writes, `None` for deletions
    pub fn to_file(&self) -> Option<LixFile> {
        self.data.as_ref().map(|data| LixFile {
            id: self.file_id.clone(),
            path: self.path.clone(),
            data: data.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

/// Kind of an entity-level edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(LixError::Other(format!("Unknown operation: {}", other))),
        }
    }
}

/// Typed value of one entity inside a file, tagged by its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder: set a field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field accessor
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Identity of an entity across its lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub file_id: String,
    pub plugin_key: String,
    pub entity_type: String,
    pub entity_id: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.file_id, self.plugin_key, self.entity_type, self.entity_id
        )
    }
}

/// An entity-level edit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: String,
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub file_id: String,
    pub plugin_key: String,
    pub operation: Operation,
    /// `neu` for creates and updates, `old` for deletes
    pub value: EntitySnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// `None` while the change is uncommitted
    pub commit_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Change {
    pub fn entity_id(&self) -> &str {
        &self.value.id
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey {
            file_id: self.file_id.clone(),
            plugin_key: self.plugin_key.clone(),
            entity_type: self.entity_type.clone(),
            entity_id: self.value.id.clone(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.commit_id.is_some()
    }

    /// Same entity state: equal operation kind for deletes and equal value
    pub fn same_state_as(&self, other: &Change) -> bool {
        let deleted = self.operation == Operation::Delete;
        let other_deleted = other.operation == Operation::Delete;
        deleted == other_deleted && (deleted || self.value == other.value)
    }
}

/// A change supplied by a caller, e.g. to resolve a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChange {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub file_id: String,
    pub plugin_key: String,
    pub operation: Operation,
    pub value: EntitySnapshot,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl NewChange {
    /// Materialize into an uncommitted change, assigning an id if missing
    pub fn into_change(self) -> Change {
        Change {
            id: self.id.unwrap_or_else(new_id),
            parent_id: self.parent_id,
            entity_type: self.entity_type,
            file_id: self.file_id,
            plugin_key: self.plugin_key,
            operation: self.operation,
            value: self.value,
            meta: self.meta,
            commit_id: None,
            created_at: Utc::now(),
        }
    }
}

impl From<Change> for NewChange {
    fn from(change: Change) -> Self {
        Self {
            id: Some(change.id),
            parent_id: change.parent_id,
            entity_type: change.entity_type,
            file_id: change.file_id,
            plugin_key: change.plugin_key,
            operation: change.operation,
            value: change.value,
            meta: change.meta,
        }
    }
}

/// An immutable node of the commit chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub parent_id: String,
    pub user_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A named pointer into the commit chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub commit_id: String,
    pub active: bool,
}

/// Two diverging leaf changes of the same entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Leaf change of the target branch
    pub change_id: String,
    /// Leaf change of the source branch
    pub conflicting_change_id: String,
    pub branch_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub resolved_with_change_id: Option<String>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.resolved_with_change_id.is_some()
    }

    pub fn involves(&self, change_id: &str) -> bool {
        self.change_id == change_id || self.conflicting_change_id == change_id
    }
}

/// Filter for listing changes
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub file_id: Option<String>,
    pub commit_id: Option<String>,
    /// Only changes without a commit
    pub uncommitted: bool,
}

impl ChangeFilter {
    pub fn uncommitted() -> Self {
        Self {
            uncommitted: true,
            ..Default::default()
        }
    }

    pub fn file(file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            ..Default::default()
        }
    }
}

/// Identifies a branch by id or by name.
///
/// Strings convert to `Name`, which also matches a branch id when no branch
/// carries that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchRef {
    Id(String),
    Name(String),
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchRef::Id(id) => f.write_str(id),
            BranchRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for BranchRef {
    fn from(value: &str) -> Self {
        BranchRef::Name(value.to_string())
    }
}

impl From<String> for BranchRef {
    fn from(value: String) -> Self {
        BranchRef::Name(value)
    }
}

impl From<&Branch> for BranchRef {
    fn from(branch: &Branch) -> Self {
        BranchRef::Id(branch.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("data.csv"), "/data.csv");
        assert_eq!(normalize_path("/data.csv"), "/data.csv");
    }

    #[test]
    fn test_snapshot_flattens_fields() {
        let snapshot = EntitySnapshot::new("row-1").with("text", "hello");
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value, json!({"id": "row-1", "text": "hello"}));

        let back: EntitySnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.get_str("text"), Some("hello"));
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("delete".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("rename".parse::<Operation>().is_err());
    }

    #[test]
    fn test_same_state_ignores_delete_payload() {
        let base = NewChange {
            id: None,
            parent_id: None,
            entity_type: "cell".into(),
            file_id: "f".into(),
            plugin_key: "csv".into(),
            operation: Operation::Delete,
            value: EntitySnapshot::new("a").with("text", "x"),
            meta: None,
        };
        let a = base.clone().into_change();
        let mut b = base.into_change();
        b.value = EntitySnapshot::new("a").with("text", "y");
        assert!(a.same_state_as(&b));

        b.operation = Operation::Update;
        assert!(!a.same_state_as(&b));
    }
}
