//! Commit manager and change queries

use chrono::Utc;
use rusqlite::{Connection, params};

use super::{branch_or_active, history, require_active_branch};
use crate::database::codec;
use crate::error::Result;
use crate::lix::Lix;
use crate::schema::{BranchRef, Change, ChangeFilter, Commit, new_id};

/// Move every working change into a new commit on the active branch.
///
/// Returns the commit and the number of changes it took. A commit without
/// changes is still created.
pub fn commit_working_changes(
    conn: &Connection,
    user_id: &str,
    description: &str,
) -> Result<(Commit, usize)> {
    let branch = require_active_branch(conn)?;
    let commit = Commit {
        id: new_id(),
        parent_id: branch.commit_id.clone(),
        user_id: user_id.to_string(),
        description: description.to_string(),
        created_at: Utc::now(),
    };

    codec::insert_commit(conn, &commit)?;
    let moved = conn.execute(
        "UPDATE change SET commit_id = ?1 WHERE commit_id IS NULL",
        params![commit.id],
    )?;
    codec::set_branch_head(conn, &branch.id, &commit.id)?;
    Ok((commit, moved))
}

impl Lix {
    /// Commit all working changes to the active branch.
    ///
    /// Writes still in the queue are not included; call [`Lix::settled`]
    /// first to commit everything written so far.
    pub async fn commit(&self, user_id: &str, description: &str) -> Result<Commit> {
        let user_id = user_id.to_string();
        let description = description.to_string();
        let (commit, moved) = self
            .db
            .transaction(move |tx| commit_working_changes(tx, &user_id, &description))
            .await?;

        if moved == 0 {
            tracing::info!(commit_id = %commit.id, "Created empty commit");
        } else {
            tracing::info!(commit_id = %commit.id, changes = moved, "Created commit");
        }
        Ok(commit)
    }

    pub async fn get_commit(&self, id: &str) -> Result<Option<Commit>> {
        let id = id.to_string();
        self.db.read(move |conn| codec::get_commit(conn, &id)).await
    }

    /// Commits of a branch (default: active), newest first
    pub async fn commit_history(
        &self,
        branch: Option<BranchRef>,
        limit: Option<usize>,
    ) -> Result<Vec<Commit>> {
        self.db
            .read(move |conn| {
                let branch = branch_or_active(conn, branch.as_ref())?;
                history::commit_history(conn, &branch.commit_id, limit)
            })
            .await
    }

    pub async fn change(&self, id: &str) -> Result<Option<Change>> {
        let id = id.to_string();
        self.db.read(move |conn| codec::get_change(conn, &id)).await
    }

    pub async fn changes(&self, filter: ChangeFilter) -> Result<Vec<Change>> {
        self.db
            .read(move |conn| codec::list_changes(conn, &filter))
            .await
    }

    /// A change followed by its ancestors along `parent_id`
    pub async fn change_history(&self, change_id: &str, depth: Option<usize>) -> Result<Vec<Change>> {
        let change_id = change_id.to_string();
        self.db
            .read(move |conn| history::change_lineage(conn, &change_id, depth))
            .await
    }

    /// Newest committed change of every entity reachable from a branch head
    pub async fn leaf_changes(&self, branch: Option<BranchRef>) -> Result<Vec<Change>> {
        self.db
            .read(move |conn| {
                let branch = branch_or_active(conn, branch.as_ref())?;
                let mut leaves: Vec<Change> = history::leaf_changes(conn, &branch.commit_id)?
                    .into_values()
                    .collect();
                leaves.sort_by(|a, b| a.entity_key().cmp(&b.entity_key()));
                Ok(leaves)
            })
            .await
    }
}
