//! Conflict detection and merging
//!
//! A source leaf is "only in source" when its change is not part of the
//! target's lineage: the changes of every commit reachable from the target
//! head plus all their `parent_id` ancestors. For each such leaf the lowest
//! common ancestor is the first change on the leaf's own lineage that the
//! target lineage contains.

use chrono::Utc;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

use super::{branch_or_active, checkout, find_branch, history, require_active_branch};
use crate::database::codec;
use crate::error::{LixError, Result};
use crate::lix::Lix;
use crate::schema::{BranchRef, Change, Conflict, EntityKey, Operation, new_id};

/// Reason recorded on detected conflicts
pub const DIVERGED_REASON: &str = "The snapshots of the change do not match";

/// How one source leaf relates to the target branch
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The entity is new to the target
    Insert,
    /// The target has not moved since the common ancestor
    FastForward,
    /// Both sides reached the same state
    Convergent,
    /// A conflict on the target branch already settled this leaf
    Resolved,
    /// Both sides diverged
    Conflict(Conflict),
}

/// Result of [`Lix::merge`]
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub source: String,
    pub target: String,
    /// The target ref moved to the source head
    pub fast_forwarded: bool,
    /// Working changes staged onto the target
    pub staged: Vec<Change>,
    pub convergent: usize,
    /// Every conflict found, including ones recorded by earlier merges
    pub conflicts: Vec<Conflict>,
}

impl MergeReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Leaf changes of `source_head` that the target lineage does not contain
pub fn leaf_changes_only_in_source(
    conn: &Connection,
    source_head: &str,
    target_head: &str,
) -> Result<Vec<Change>> {
    let target_lineage = history::lineage_ids_by_entity(conn, target_head)?;
    only_in_source(conn, source_head, &target_lineage)
}

fn only_in_source(
    conn: &Connection,
    source_head: &str,
    target_lineage: &HashMap<EntityKey, HashSet<String>>,
) -> Result<Vec<Change>> {
    let mut leaves: Vec<Change> = history::leaf_changes(conn, source_head)?
        .into_values()
        .filter(|leaf| {
            !target_lineage
                .get(&leaf.entity_key())
                .is_some_and(|ids| ids.contains(&leaf.id))
        })
        .collect();
    leaves.sort_by(|a, b| a.entity_key().cmp(&b.entity_key()));
    Ok(leaves)
}

/// Classify every source-only leaf against the target branch
pub fn plan_merge(
    conn: &Connection,
    source_head: &str,
    target_head: &str,
    target_branch_id: &str,
) -> Result<Vec<(Change, MergeOutcome)>> {
    let target_lineage = history::lineage_ids_by_entity(conn, target_head)?;
    let target_leaves = history::leaf_changes(conn, target_head)?;
    let resolved: HashSet<String> = codec::list_conflicts(conn, false)?
        .into_iter()
        .filter(|c| c.branch_id == target_branch_id && c.is_resolved())
        .map(|c| c.conflicting_change_id)
        .collect();

    let mut plan = Vec::new();
    for leaf in only_in_source(conn, source_head, &target_lineage)? {
        let key = leaf.entity_key();
        let outcome = if resolved.contains(&leaf.id) {
            MergeOutcome::Resolved
        } else {
            let lca = match target_lineage.get(&key) {
                Some(ids) => history::change_lineage(conn, &leaf.id, None)?
                    .into_iter()
                    .find(|change| ids.contains(&change.id)),
                None => None,
            };
            classify(&leaf, lca.as_ref(), target_leaves.get(&key), target_branch_id)
        };
        plan.push((leaf, outcome));
    }
    Ok(plan)
}

fn classify(
    source_leaf: &Change,
    lca: Option<&Change>,
    target_leaf: Option<&Change>,
    target_branch_id: &str,
) -> MergeOutcome {
    let Some(target_leaf) = target_leaf else {
        return MergeOutcome::Insert;
    };
    if lca.is_some_and(|lca| lca.id == target_leaf.id) {
        return MergeOutcome::FastForward;
    }
    if target_leaf.same_state_as(source_leaf) {
        return MergeOutcome::Convergent;
    }
    MergeOutcome::Conflict(Conflict {
        change_id: target_leaf.id.clone(),
        conflicting_change_id: source_leaf.id.clone(),
        branch_id: target_branch_id.to_string(),
        reason: Some(DIVERGED_REASON.to_string()),
        meta: None,
        resolved_with_change_id: None,
    })
}

/// Conflicts between two heads, without recording them
pub fn detect_conflicts(
    conn: &Connection,
    source_head: &str,
    target_head: &str,
    target_branch_id: &str,
) -> Result<Vec<Conflict>> {
    Ok(plan_merge(conn, source_head, target_head, target_branch_id)?
        .into_iter()
        .filter_map(|(_, outcome)| match outcome {
            MergeOutcome::Conflict(conflict) => Some(conflict),
            _ => None,
        })
        .collect())
}

/// Working copy of a source leaf on the target
fn stage_copy(leaf: &Change) -> Change {
    Change {
        id: new_id(),
        parent_id: Some(leaf.id.clone()),
        commit_id: None,
        created_at: Utc::now(),
        ..leaf.clone()
    }
}

impl Lix {
    /// Source leaves the target branch (default: active) has not seen
    pub async fn leaf_changes_only_in_source(
        &self,
        source: impl Into<BranchRef>,
        target: Option<BranchRef>,
    ) -> Result<Vec<Change>> {
        let source = source.into();
        self.db
            .read(move |conn| {
                let source = find_branch(conn, &source)?;
                let target = branch_or_active(conn, target.as_ref())?;
                leaf_changes_only_in_source(conn, &source.commit_id, &target.commit_id)
            })
            .await
    }

    /// Conflicts merging `source` into `target` (default: active) would
    /// produce. Nothing is recorded.
    pub async fn detect_conflicts(
        &self,
        source: impl Into<BranchRef>,
        target: Option<BranchRef>,
    ) -> Result<Vec<Conflict>> {
        let source = source.into();
        self.db
            .read(move |conn| {
                let source = find_branch(conn, &source)?;
                let target = branch_or_active(conn, target.as_ref())?;
                detect_conflicts(conn, &source.commit_id, &target.commit_id, &target.id)
            })
            .await
    }

    /// Merge `source` into the active branch.
    ///
    /// Conflicts are recorded. Without conflicts, a target that is an ancestor
    /// of the source is fast-forwarded; otherwise the non-conflicting source
    /// leaves are staged as working changes and rendered into the files.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::UncommittedChanges`] if the working state is not
    /// clean.
    pub async fn merge(&self, source: impl Into<BranchRef>) -> Result<MergeReport> {
        let source = source.into();
        self.settled().await?;

        let plugins = self.plugins.clone();
        let report = self
            .db
            .transaction(move |tx| {
                let source = find_branch(tx, &source)?;
                let target = require_active_branch(tx)?;
                if source.id == target.id {
                    return Err(LixError::Other(format!(
                        "Cannot merge branch '{}' into itself",
                        source.name
                    )));
                }

                let pending = codec::count_uncommitted(tx)? + codec::queue_len(tx)?;
                if pending > 0 {
                    return Err(LixError::UncommittedChanges(pending));
                }

                let plan = plan_merge(tx, &source.commit_id, &target.commit_id, &target.id)?;
                let mut report = MergeReport {
                    source: source.name.clone(),
                    target: target.name.clone(),
                    fast_forwarded: false,
                    staged: Vec::new(),
                    convergent: 0,
                    conflicts: Vec::new(),
                };

                let mut to_stage = Vec::new();
                for (leaf, outcome) in plan {
                    match outcome {
                        MergeOutcome::Insert if leaf.operation == Operation::Delete => {}
                        MergeOutcome::Insert | MergeOutcome::FastForward => to_stage.push(leaf),
                        MergeOutcome::Convergent => report.convergent += 1,
                        MergeOutcome::Resolved => {}
                        MergeOutcome::Conflict(conflict) => {
                            if codec::insert_conflict(tx, &conflict)? {
                                tracing::debug!(
                                    change_id = %conflict.change_id,
                                    conflicting_change_id = %conflict.conflicting_change_id,
                                    "Recorded conflict"
                                );
                            }
                            report.conflicts.push(conflict);
                        }
                    }
                }

                if report.conflicts.is_empty()
                    && history::is_ancestor(tx, &target.commit_id, &source.commit_id)?
                {
                    codec::set_branch_head(tx, &target.id, &source.commit_id)?;
                    checkout::rematerialize(tx, &plugins, &target.commit_id, &source.commit_id)?;
                    report.fast_forwarded = target.commit_id != source.commit_id;
                    return Ok(report);
                }

                for leaf in &to_stage {
                    let copy = stage_copy(leaf);
                    codec::insert_change(tx, &copy)?;
                    report.staged.push(copy);
                }
                checkout::apply_to_files(tx, &plugins, report.staged.clone())?;
                Ok(report)
            })
            .await?;

        tracing::info!(
            source = %report.source,
            target = %report.target,
            fast_forwarded = report.fast_forwarded,
            staged = report.staged.len(),
            conflicts = report.conflicts.len(),
            "Merged branch"
        );
        Ok(report)
    }

    /// Recorded conflicts, optionally only unresolved ones
    pub async fn conflicts(&self, unresolved_only: bool) -> Result<Vec<Conflict>> {
        self.db
            .read(move |conn| codec::list_conflicts(conn, unresolved_only))
            .await
    }
}
