//! Re-rendering file bytes from change sets
//!
//! Used by branch switches, fast-forward merges and conflict resolution. These
//! paths write the `file` row directly and never enqueue, so re-rendered bytes
//! do not produce new changes. Files appear and disappear with their entities.

use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};

use super::history;
use crate::database::codec;
use crate::error::Result;
use crate::plugin::PluginRegistry;
use crate::schema::{Change, LixFile, Operation};

/// Leaves that differ between two heads, as seen from `to_head`.
///
/// Entities that only exist at `from_head` come back as deletes of their last
/// value.
pub fn changed_leaves(conn: &Connection, from_head: &str, to_head: &str) -> Result<Vec<Change>> {
    let from = history::leaf_changes(conn, from_head)?;
    let to = history::leaf_changes(conn, to_head)?;

    let mut changed: Vec<Change> = to
        .iter()
        .filter(|(key, leaf)| from.get(*key).is_none_or(|prev| prev.id != leaf.id))
        .map(|(_, leaf)| leaf.clone())
        .collect();

    for (key, leaf) in from {
        if !to.contains_key(&key) && leaf.operation != Operation::Delete {
            changed.push(Change {
                operation: Operation::Delete,
                ..leaf
            });
        }
    }
    Ok(changed)
}

/// Re-render every file whose leaves differ between the two heads.
///
/// The active branch must already point at `to_head`.
pub fn rematerialize(
    conn: &Connection,
    plugins: &PluginRegistry,
    from_head: &str,
    to_head: &str,
) -> Result<usize> {
    if from_head == to_head {
        return Ok(0);
    }
    let changed = changed_leaves(conn, from_head, to_head)?;
    apply_to_files(conn, plugins, changed)
}

/// Live leaf changes per file in the working state: the active head overlaid
/// with uncommitted changes
fn live_changes_by_file(conn: &Connection) -> Result<HashMap<String, Vec<Change>>> {
    let head = super::require_active_branch(conn)?.commit_id;
    let mut leaves = history::leaf_changes(conn, &head)?;
    for change in codec::uncommitted_changes(conn)? {
        leaves.insert(change.entity_key(), change);
    }

    let mut live: HashMap<String, Vec<Change>> = HashMap::new();
    for change in leaves.into_values() {
        if change.operation != Operation::Delete {
            live.entry(change.file_id.clone()).or_default().push(change);
        }
    }
    Ok(live)
}

/// Row to render a missing file into, rebuilt from its last known path
fn restore_row(conn: &Connection, file_id: &str) -> Result<Option<LixFile>> {
    let Some(file) = codec::last_known_file(conn, file_id)? else {
        tracing::warn!(file_id = %file_id, "No known path for file, skipped re-render");
        return Ok(None);
    };
    if let Some(occupant) = codec::file_id_at_path(conn, &file.path)? {
        tracing::warn!(
            file_id = %file_id,
            path = %file.path,
            occupant = %occupant,
            "Path taken by another file, skipped re-render"
        );
        return Ok(None);
    }
    Ok(Some(file))
}

fn by_plugin(changes: Vec<Change>) -> BTreeMap<String, Vec<Change>> {
    let mut groups: BTreeMap<String, Vec<Change>> = BTreeMap::new();
    for change in changes {
        groups.entry(change.plugin_key.clone()).or_default().push(change);
    }
    for changes in groups.values_mut() {
        changes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
    groups
}

/// Apply changes to the files they belong to, one plugin call per file and
/// plugin, oldest change first. Returns the number of files rewritten or removed.
///
/// The working state decides whether a file exists: a file without any live
/// entity loses its row, and a file with live entities but no row is rebuilt
/// from empty bytes under its last known path.
pub fn apply_to_files(conn: &Connection, plugins: &PluginRegistry, changes: Vec<Change>) -> Result<usize> {
    if changes.is_empty() {
        return Ok(0);
    }
    let mut by_file: BTreeMap<String, Vec<Change>> = BTreeMap::new();
    for change in changes {
        by_file.entry(change.file_id.clone()).or_default().push(change);
    }
    let mut live = live_changes_by_file(conn)?;
    let mut touched = 0;

    // Removals run first so a restored file can reuse a freed path
    let mut renders = Vec::new();
    for (file_id, changes) in by_file {
        let live = live.remove(&file_id).unwrap_or_default();
        if !live.is_empty() {
            renders.push((file_id, changes, live));
        } else if codec::get_file(conn, &file_id)?.is_some() {
            codec::delete_file(conn, &file_id)?;
            tracing::debug!(file_id = %file_id, "Removed file without live entities");
            touched += 1;
        }
    }

    for (file_id, changes, live) in renders {
        let (mut file, changes) = match codec::get_file(conn, &file_id)? {
            Some(file) => (file, changes),
            None => match restore_row(conn, &file_id)? {
                Some(file) => (file, live),
                None => continue,
            },
        };

        for (plugin_key, changes) in by_plugin(changes) {
            let plugin = plugins.require(&plugin_key)?;
            file.data = plugin.apply_changes(&changes, &file)?;
            tracing::debug!(file_id = %file_id, plugin = %plugin_key, changes = changes.len(), "Re-rendered file");
        }
        codec::upsert_file(conn, &file)?;
        touched += 1;
    }
    Ok(touched)
}
