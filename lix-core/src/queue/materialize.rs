//! Turns one queue entry into change rows
//!
//! Runs inside the caller's transaction: change rows, the file row and the
//! queue-entry deletion commit together or not at all.

use rusqlite::Connection;
use std::sync::Arc;

use crate::database::codec;
use crate::error::{LixError, Result};
use crate::plugin::{DiffReport, LixPlugin, PluginRegistry};
use crate::schema::{Change, ChangeQueueEntry, EntityKey, Operation, ROOT_COMMIT_ID, new_id};
use crate::versioning::history;

/// What happened to the change rows of one entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    /// New change rows
    pub inserted: usize,
    /// Uncommitted rows overwritten in place
    pub updated: usize,
    /// Uncommitted rows dropped because the edit was undone
    pub collapsed: usize,
}

impl MaterializeStats {
    fn add(&mut self, other: MaterializeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.collapsed += other.collapsed;
    }
}

/// Diff the entry against the materialized file and record the resulting changes
pub fn process_entry(
    conn: &Connection,
    plugins: &PluginRegistry,
    entry: &ChangeQueueEntry,
) -> Result<MaterializeStats> {
    let previous = codec::get_file(conn, &entry.file_id)?;
    let neu = entry.to_file();
    let head = codec::active_branch(conn)?
        .map(|branch| branch.commit_id)
        .unwrap_or_else(|| ROOT_COMMIT_ID.to_string());

    let mut stats = MaterializeStats::default();
    if previous.is_some() || neu.is_some() {
        for plugin in plugins.matching(&entry.path) {
            let reports = plugin.diff_file(previous.as_ref(), neu.as_ref())?;
            for report in reports {
                stats.add(record_report(conn, plugin, &head, &entry.file_id, report)?);
            }
        }
    }

    match &neu {
        Some(file) => codec::upsert_file(conn, file)?,
        None => codec::delete_file(conn, &entry.file_id)?,
    }
    codec::dequeue(conn, entry.id)?;
    Ok(stats)
}

fn report_value(plugin: &Arc<dyn LixPlugin>, report: &DiffReport) -> Result<crate::schema::EntitySnapshot> {
    report.value().cloned().ok_or_else(|| {
        LixError::plugin(
            plugin.key(),
            format!("{} report of type '{}' has neither old nor neu", report.operation, report.entity_type),
        )
    })
}

fn entity_key(plugin: &Arc<dyn LixPlugin>, file_id: &str, report: &DiffReport, entity_id: &str) -> EntityKey {
    EntityKey {
        file_id: file_id.to_string(),
        plugin_key: plugin.key().to_string(),
        entity_type: report.entity_type.clone(),
        entity_id: entity_id.to_string(),
    }
}

/// Record one entity report against the committed leaf at `head`.
///
/// At most one uncommitted row exists per entity: later edits overwrite it,
/// and an edit that lands back on the committed value drops it.
fn record_report(
    conn: &Connection,
    plugin: &Arc<dyn LixPlugin>,
    head: &str,
    file_id: &str,
    report: DiffReport,
) -> Result<MaterializeStats> {
    let value = report_value(plugin, &report)?;
    let key = entity_key(plugin, file_id, &report, &value.id);
    let working = codec::uncommitted_change(conn, &key)?;
    let parent = history::leaf_committed_change(conn, head, &key)?;

    let undone = match &parent {
        Some(parent) => {
            let committed = (parent.operation != Operation::Delete).then_some(&parent.value);
            plugin
                .diff_entity(&report.entity_type, committed, report.neu.as_ref())?
                .is_empty()
        }
        // Created and deleted without a commit in between
        None => working.is_some() && report.operation == Operation::Delete,
    };
    if undone {
        let Some(working) = working else {
            return Ok(MaterializeStats::default());
        };
        codec::delete_change(conn, &working.id)?;
        tracing::debug!(entity = %key, "Edit reverted to committed value, dropped working change");
        return Ok(MaterializeStats { collapsed: 1, ..Default::default() });
    }

    let operation = match (&parent, report.operation) {
        (_, Operation::Delete) => Operation::Delete,
        (Some(parent), _) if parent.operation != Operation::Delete => Operation::Update,
        _ => Operation::Create,
    };

    match working {
        Some(working) => {
            let updated = Change {
                operation,
                value,
                meta: report.meta,
                ..working
            };
            codec::update_uncommitted_change(conn, &updated)?;
            Ok(MaterializeStats { updated: 1, ..Default::default() })
        }
        None => {
            let change = Change {
                id: new_id(),
                parent_id: parent.map(|parent| parent.id),
                entity_type: report.entity_type,
                file_id: file_id.to_string(),
                plugin_key: plugin.key().to_string(),
                operation,
                value,
                meta: report.meta,
                commit_id: None,
                created_at: chrono::Utc::now(),
            };
            codec::insert_change(conn, &change)?;
            Ok(MaterializeStats { inserted: 1, ..Default::default() })
        }
    }
}
