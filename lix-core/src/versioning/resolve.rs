//! Conflict resolution
//!
//! Both strategies run in one transaction, record the winning change on the
//! conflict and re-render the affected file. The outcome lives in the working
//! state until the next commit.

use chrono::Utc;
use rusqlite::Connection;

use super::{checkout, require_active_branch};
use crate::database::codec;
use crate::error::{LixError, Result};
use crate::lix::Lix;
use crate::plugin::PluginRegistry;
use crate::schema::{Change, Conflict, NewChange, new_id};

fn load_conflict(conn: &Connection, conflict: &Conflict) -> Result<Conflict> {
    let stored = codec::get_conflict(conn, &conflict.change_id, &conflict.conflicting_change_id)?
        .ok_or_else(|| LixError::ConflictNotFound {
            change_id: conflict.change_id.clone(),
            conflicting_change_id: conflict.conflicting_change_id.clone(),
        })?;

    let active = require_active_branch(conn)?;
    if stored.branch_id != active.id {
        return Err(LixError::ConflictBranchNotActive {
            branch_id: stored.branch_id,
        });
    }
    Ok(stored)
}

fn require_change(conn: &Connection, id: &str) -> Result<Change> {
    codec::get_change(conn, id)?.ok_or_else(|| LixError::ChangeNotFound(id.to_string()))
}

/// Drop the working change of the same entity so `change` can take its place
fn clear_working_change(conn: &Connection, change: &Change) -> Result<()> {
    if let Some(working) = codec::uncommitted_change(conn, &change.entity_key())? {
        codec::delete_change(conn, &working.id)?;
    }
    Ok(())
}

fn finish(
    conn: &Connection,
    plugins: &PluginRegistry,
    conflict: Conflict,
    rendered: Change,
    resolved_with: String,
) -> Result<Conflict> {
    codec::set_conflict_resolution(
        conn,
        &conflict.change_id,
        &conflict.conflicting_change_id,
        &resolved_with,
    )?;
    checkout::apply_to_files(conn, plugins, vec![rendered])?;
    Ok(Conflict {
        resolved_with_change_id: Some(resolved_with),
        ..conflict
    })
}

impl Lix {
    /// Resolve a conflict by picking one of its two changes.
    ///
    /// Picking the target side keeps the branch as it is. Picking the source
    /// side stages a working copy of it as a child of the target change.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::SelectedChangeNotInConflict`] if `selected_change_id`
    /// is neither side of the conflict.
    pub async fn resolve_conflict_by_selecting(
        &self,
        conflict: &Conflict,
        selected_change_id: &str,
    ) -> Result<Conflict> {
        if !conflict.involves(selected_change_id) {
            return Err(LixError::SelectedChangeNotInConflict {
                selected: selected_change_id.to_string(),
                change_id: conflict.change_id.clone(),
                conflicting_change_id: conflict.conflicting_change_id.clone(),
            });
        }

        let conflict = conflict.clone();
        let selected_id = selected_change_id.to_string();
        let plugins = self.plugins.clone();
        let resolved = self
            .db
            .transaction(move |tx| {
                let stored = load_conflict(tx, &conflict)?;
                let selected = require_change(tx, &selected_id)?;
                clear_working_change(tx, &selected)?;

                let rendered = if selected.id == stored.conflicting_change_id {
                    let copy = Change {
                        id: new_id(),
                        parent_id: Some(stored.change_id.clone()),
                        commit_id: None,
                        created_at: Utc::now(),
                        ..selected.clone()
                    };
                    codec::insert_change(tx, &copy)?;
                    copy
                } else {
                    selected.clone()
                };
                finish(tx, &plugins, stored, rendered, selected.id)
            })
            .await?;

        tracing::info!(
            change_id = %resolved.change_id,
            conflicting_change_id = %resolved.conflicting_change_id,
            selected = %selected_change_id,
            "Resolved conflict by selection"
        );
        Ok(resolved)
    }

    /// Resolve a conflict with a new reconciling change.
    ///
    /// The change must be a direct child of the conflict's target change, on
    /// the same file, and not yet persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::ChangeNotDirectChildOfConflict`],
    /// [`LixError::ChangeDoesNotBelongToFile`] or
    /// [`LixError::ChangeAlreadyExists`] when the change breaks one of those
    /// rules.
    pub async fn resolve_conflict_with_new_change(
        &self,
        conflict: &Conflict,
        new_change: NewChange,
    ) -> Result<Change> {
        let conflict = conflict.clone();
        let plugins = self.plugins.clone();
        let (resolved, change) = self
            .db
            .transaction(move |tx| {
                let stored = codec::get_conflict(tx, &conflict.change_id, &conflict.conflicting_change_id)?
                    .ok_or_else(|| LixError::ConflictNotFound {
                        change_id: conflict.change_id.clone(),
                        conflicting_change_id: conflict.conflicting_change_id.clone(),
                    })?;
                let change = new_change.into_change();

                if change.parent_id.as_deref() != Some(stored.change_id.as_str()) {
                    return Err(LixError::ChangeNotDirectChildOfConflict {
                        change_id: change.id,
                        expected_parent: stored.change_id,
                    });
                }
                let target = require_change(tx, &stored.change_id)?;
                if change.file_id != target.file_id {
                    return Err(LixError::ChangeDoesNotBelongToFile {
                        change_id: change.id,
                        file_id: change.file_id,
                        expected_file_id: target.file_id,
                    });
                }
                if codec::change_exists(tx, &change.id)? {
                    return Err(LixError::ChangeAlreadyExists(change.id));
                }

                let stored = load_conflict(tx, &stored)?;
                clear_working_change(tx, &change)?;
                codec::insert_change(tx, &change)?;
                let resolved = finish(tx, &plugins, stored, change.clone(), change.id.clone())?;
                Ok((resolved, change))
            })
            .await?;

        tracing::info!(
            change_id = %resolved.change_id,
            conflicting_change_id = %resolved.conflicting_change_id,
            resolved_with = %change.id,
            "Resolved conflict with new change"
        );
        Ok(change)
    }
}
