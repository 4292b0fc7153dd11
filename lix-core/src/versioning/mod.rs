//! Commits, branches, merges and conflict resolution
//!
//! Each submodule adds methods to [`Lix`](crate::Lix). The SQL-level work is
//! done by plain functions over a [`rusqlite::Connection`] so it can run inside
//! one store transaction.

pub mod branch;
pub mod checkout;
pub mod commit;
pub mod history;
pub mod merge;
pub mod resolve;

use rusqlite::Connection;

use crate::database::codec;
use crate::error::{LixError, Result};
use crate::schema::{Branch, BranchRef};

pub use merge::{MergeOutcome, MergeReport};

/// Look up a branch by id or name
pub(crate) fn find_branch(conn: &Connection, branch: &BranchRef) -> Result<Branch> {
    let found = match branch {
        BranchRef::Id(id) => codec::branch_by_id(conn, id)?,
        BranchRef::Name(name) => match codec::branch_by_name(conn, name)? {
            Some(branch) => Some(branch),
            None => codec::branch_by_id(conn, name)?,
        },
    };
    found.ok_or_else(|| LixError::BranchNotFound(branch.to_string()))
}

pub(crate) fn require_active_branch(conn: &Connection) -> Result<Branch> {
    codec::active_branch(conn)?
        .ok_or_else(|| LixError::BranchNotFound("no active branch".to_string()))
}

/// The given branch, or the active one
pub(crate) fn branch_or_active(conn: &Connection, branch: Option<&BranchRef>) -> Result<Branch> {
    match branch {
        Some(branch) => find_branch(conn, branch),
        None => require_active_branch(conn),
    }
}
