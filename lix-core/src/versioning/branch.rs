//! Branch manager

use super::{branch_or_active, checkout, find_branch, require_active_branch};
use crate::database::codec;
use crate::error::{LixError, Result};
use crate::lix::Lix;
use crate::schema::{Branch, BranchRef, new_id};

impl Lix {
    pub async fn branches(&self) -> Result<Vec<Branch>> {
        self.db.read(codec::list_branches).await
    }

    pub async fn active_branch(&self) -> Result<Branch> {
        self.db.read(require_active_branch).await
    }

    pub async fn branch(&self, branch: impl Into<BranchRef>) -> Result<Branch> {
        let branch = branch.into();
        self.db.read(move |conn| find_branch(conn, &branch)).await
    }

    /// Create an inactive branch at the head of `from` (default: active branch).
    ///
    /// # Errors
    ///
    /// Returns [`LixError::BranchAlreadyExists`] if the name is taken.
    pub async fn create_branch(&self, name: &str, from: Option<BranchRef>) -> Result<Branch> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(LixError::Other("Branch name must not be empty".to_string()));
        }

        let branch = self
            .db
            .transaction(move |tx| {
                if codec::branch_by_name(tx, &name)?.is_some() {
                    return Err(LixError::BranchAlreadyExists(name));
                }
                let base = branch_or_active(tx, from.as_ref())?;
                let branch = Branch {
                    id: new_id(),
                    name,
                    commit_id: base.commit_id,
                    active: false,
                };
                codec::insert_branch(tx, &branch)?;
                Ok(branch)
            })
            .await?;

        tracing::info!(branch = %branch.name, commit_id = %branch.commit_id, "Created branch");
        Ok(branch)
    }

    /// Delete an inactive branch. Its commits and changes stay in the store.
    pub async fn delete_branch(&self, branch: impl Into<BranchRef>) -> Result<()> {
        let branch = branch.into();
        let deleted = self
            .db
            .transaction(move |tx| {
                let branch = find_branch(tx, &branch)?;
                if branch.active {
                    return Err(LixError::CannotDeleteActiveBranch(branch.name));
                }
                codec::delete_branch(tx, &branch.id)?;
                Ok(branch)
            })
            .await?;

        tracing::info!(branch = %deleted.name, "Deleted branch");
        Ok(())
    }

    /// Activate another branch and re-render the files that differ.
    ///
    /// Waits for the queue to settle first.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::UncommittedChanges`] if the working state is not
    /// clean, and [`LixError::BranchNotFound`] for an unknown branch.
    pub async fn switch_branch(&self, branch: impl Into<BranchRef>) -> Result<Branch> {
        let target = branch.into();
        self.settled().await?;

        let plugins = self.plugins.clone();
        let (branch, rendered) = self
            .db
            .transaction(move |tx| {
                let target = find_branch(tx, &target)?;
                if target.active {
                    return Ok((target, 0));
                }

                let pending = codec::count_uncommitted(tx)? + codec::queue_len(tx)?;
                if pending > 0 {
                    return Err(LixError::UncommittedChanges(pending));
                }

                let current = require_active_branch(tx)?;
                codec::set_active_branch(tx, &target.id)?;
                let rendered =
                    checkout::rematerialize(tx, &plugins, &current.commit_id, &target.commit_id)?;
                Ok((Branch { active: true, ..target }, rendered))
            })
            .await?;

        tracing::info!(branch = %branch.name, files = rendered, "Switched branch");
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::LixError;
    use crate::schema::{BranchRef, DEFAULT_BRANCH};
    use crate::testing::{kv_lix, read, write};

    #[tokio::test]
    async fn test_create_and_list() {
        let lix = kv_lix().await;
        let feature = lix.create_branch("feature", None).await.unwrap();
        assert!(!feature.active);

        let names: Vec<String> = lix.branches().await.unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["feature".to_string(), DEFAULT_BRANCH.to_string()]);

        assert!(matches!(
            lix.create_branch("feature", None).await,
            Err(LixError::BranchAlreadyExists(_))
        ));

        let by_id = lix.branch(BranchRef::Id(feature.id.clone())).await.unwrap();
        assert_eq!(by_id.name, "feature");
        let by_id_as_name = lix.branch(feature.id.as_str()).await.unwrap();
        assert_eq!(by_id_as_name.id, feature.id);
    }

    #[tokio::test]
    async fn test_switch_rerenders_files() {
        let lix = kv_lix().await;
        write(&lix, "/config.kv", "a=1\nb=1\n").await;
        lix.commit("tester", "base").await.unwrap();

        lix.create_branch("feature", None).await.unwrap();
        lix.switch_branch("feature").await.unwrap();
        write(&lix, "/config.kv", "a=2\nc=3\n").await;
        lix.commit("tester", "feature edit").await.unwrap();

        let main = lix.switch_branch(DEFAULT_BRANCH).await.unwrap();
        assert!(main.active);
        assert_eq!(read(&lix, "/config.kv").await, "a=1\nb=1\n");

        lix.switch_branch("feature").await.unwrap();
        assert_eq!(read(&lix, "/config.kv").await, "a=2\nc=3\n");
        assert_eq!(lix.active_branch().await.unwrap().name, "feature");
    }

    #[tokio::test]
    async fn test_switch_restores_file_deleted_on_the_branch_left() {
        let lix = kv_lix().await;
        let id = write(&lix, "/a.kv", "a=1\n").await;
        lix.commit("tester", "base").await.unwrap();
        lix.create_branch("feature", None).await.unwrap();

        lix.delete_file(&id).await.unwrap();
        lix.settled().await.unwrap();
        lix.commit("tester", "drop a").await.unwrap();
        assert!(lix.file_by_path("/a.kv").await.unwrap().is_none());

        lix.switch_branch("feature").await.unwrap();
        let restored = lix.file_by_path("/a.kv").await.unwrap().unwrap();
        assert_eq!(restored.id, id);
        assert_eq!(restored.data, b"a=1\n");

        lix.switch_branch(DEFAULT_BRANCH).await.unwrap();
        assert!(lix.file(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_switch_hides_file_created_on_the_branch_left() {
        let lix = kv_lix().await;
        write(&lix, "/base.kv", "x=1\n").await;
        lix.commit("tester", "base").await.unwrap();
        lix.create_branch("feature", None).await.unwrap();

        lix.switch_branch("feature").await.unwrap();
        let feature_id = write(&lix, "/new.kv", "n=1\n").await;
        lix.commit("tester", "add new").await.unwrap();

        lix.switch_branch(DEFAULT_BRANCH).await.unwrap();
        assert!(lix.file_by_path("/new.kv").await.unwrap().is_none());
        assert_eq!(read(&lix, "/base.kv").await, "x=1\n");

        // The path is free again on main
        let main_id = write(&lix, "/new.kv", "m=2\n").await;
        assert_ne!(main_id, feature_id);
        lix.commit("tester", "main new").await.unwrap();

        lix.switch_branch("feature").await.unwrap();
        let file = lix.file_by_path("/new.kv").await.unwrap().unwrap();
        assert_eq!(file.id, feature_id);
        assert_eq!(file.data, b"n=1\n");
        assert!(lix.file(&main_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_switch_refuses_dirty_state() {
        let lix = kv_lix().await;
        lix.create_branch("feature", None).await.unwrap();
        write(&lix, "/config.kv", "a=1\n").await;

        assert!(matches!(
            lix.switch_branch("feature").await,
            Err(LixError::UncommittedChanges(1))
        ));
        assert_eq!(lix.active_branch().await.unwrap().name, DEFAULT_BRANCH);
    }

    #[tokio::test]
    async fn test_delete_branch() {
        let lix = kv_lix().await;
        lix.create_branch("feature", None).await.unwrap();

        assert!(matches!(
            lix.delete_branch(DEFAULT_BRANCH).await,
            Err(LixError::CannotDeleteActiveBranch(_))
        ));
        lix.delete_branch("feature").await.unwrap();
        assert!(matches!(
            lix.branch("feature").await,
            Err(LixError::BranchNotFound(_))
        ));
    }
}
