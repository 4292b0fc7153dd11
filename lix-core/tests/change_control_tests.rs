//! End-to-end change control through the public API
//!
//! Covers the write → queue → change → commit path, the undo collapse, branch
//! switching with re-rendering, and conflict resolution across branches.

use std::collections::BTreeMap;
use std::sync::Arc;

use lix_core::prelude::*;

/// Whole file as one `text` entity, id = file path without the slash
struct MockTextPlugin;

impl MockTextPlugin {
    fn snapshot(file: &LixFile) -> EntitySnapshot {
        EntitySnapshot::new(file.path.trim_start_matches('/'))
            .with("text", String::from_utf8_lossy(&file.data).to_string())
    }
}

impl LixPlugin for MockTextPlugin {
    fn key(&self) -> &str {
        "mock-text"
    }

    fn glob(&self) -> &str {
        "*"
    }

    fn diff_file(&self, old: Option<&LixFile>, neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
        Ok(match (old, neu) {
            (None, Some(neu)) => vec![DiffReport::create("text", Self::snapshot(neu))],
            (Some(old), Some(neu)) if old.data != neu.data => {
                vec![DiffReport::update("text", Self::snapshot(old), Self::snapshot(neu))]
            }
            (Some(old), None) => vec![DiffReport::delete("text", Self::snapshot(old))],
            _ => vec![],
        })
    }

    fn apply_changes(&self, changes: &[Change], file: &LixFile) -> Result<Vec<u8>> {
        let mut data = file.data.clone();
        for change in changes {
            data = match change.operation {
                Operation::Delete => Vec::new(),
                _ => change.value.get_str("text").unwrap_or_default().as_bytes().to_vec(),
            };
        }
        Ok(data)
    }
}

/// `key=value` lines with one `pair` entity per key
struct PairsPlugin;

impl PairsPlugin {
    fn parse(data: &[u8]) -> BTreeMap<String, String> {
        String::from_utf8_lossy(data)
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl LixPlugin for PairsPlugin {
    fn key(&self) -> &str {
        "pairs"
    }

    fn glob(&self) -> &str {
        "*.pairs"
    }

    fn diff_file(&self, old: Option<&LixFile>, neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
        let old = old.map(|f| Self::parse(&f.data)).unwrap_or_default();
        let neu = neu.map(|f| Self::parse(&f.data)).unwrap_or_default();
        let pair = |k: &str, v: &str| EntitySnapshot::new(k).with("value", v);

        let mut reports = Vec::new();
        for (k, v) in &neu {
            match old.get(k) {
                None => reports.push(DiffReport::create("pair", pair(k, v))),
                Some(before) if before != v => {
                    reports.push(DiffReport::update("pair", pair(k, before), pair(k, v)))
                }
                Some(_) => {}
            }
        }
        for (k, v) in &old {
            if !neu.contains_key(k) {
                reports.push(DiffReport::delete("pair", pair(k, v)));
            }
        }
        Ok(reports)
    }

    fn apply_changes(&self, changes: &[Change], file: &LixFile) -> Result<Vec<u8>> {
        let mut pairs = Self::parse(&file.data);
        for change in changes {
            match change.operation {
                Operation::Delete => {
                    pairs.remove(change.entity_id());
                }
                _ => {
                    let value = change.value.get_str("value").unwrap_or_default();
                    pairs.insert(change.entity_id().to_string(), value.to_string());
                }
            }
        }
        Ok(pairs
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect::<String>()
            .into_bytes())
    }
}

async fn text_lix() -> Lix {
    Lix::open_in_memory(vec![Arc::new(MockTextPlugin)])
        .await
        .expect("open lix")
}

async fn pairs_lix() -> Lix {
    Lix::open_in_memory(vec![Arc::new(PairsPlugin)])
        .await
        .expect("open lix")
}

async fn contents(lix: &Lix, id: &str) -> String {
    let file = lix.file(id).await.unwrap().expect("file exists");
    String::from_utf8(file.data).unwrap()
}

#[tokio::test]
async fn test_insert_commit_update_commit() {
    let lix = text_lix().await;
    lix.insert_file(LixFile::with_id("file-1", "test", "inserted text"))
        .await
        .unwrap();
    lix.settled().await.unwrap();

    let working = lix.changes(ChangeFilter::uncommitted()).await.unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].entity_type, "text");
    assert_eq!(working[0].operation, Operation::Create);
    assert_eq!(working[0].value.id, "test");
    assert_eq!(working[0].value.get_str("text"), Some("inserted text"));
    assert!(working[0].commit_id.is_none());

    let first = lix.commit("tester", "test").await.unwrap();
    assert_eq!(first.parent_id, ROOT_COMMIT_ID);
    let committed = lix.change(&working[0].id).await.unwrap().unwrap();
    assert_eq!(committed.commit_id.as_deref(), Some(first.id.as_str()));

    lix.update_file("file-1", "test updated text").await.unwrap();
    lix.settled().await.unwrap();

    let working = lix.changes(ChangeFilter::uncommitted()).await.unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].parent_id.as_deref(), Some(committed.id.as_str()));
    assert_eq!(working[0].operation, Operation::Update);

    let second = lix.commit("tester", "test 2").await.unwrap();
    assert_eq!(second.parent_id, first.id);

    let history = lix.commit_history(None, None).await.unwrap();
    let ids: Vec<&str> = history.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

    let lineage = lix.change_history(&working[0].id, None).await.unwrap();
    assert_eq!(lineage.len(), 2);
}

#[tokio::test]
async fn test_keystrokes_keep_one_working_change() {
    let lix = text_lix().await;
    lix.insert_file(LixFile::with_id("file-1", "notes", "a"))
        .await
        .unwrap();
    for text in ["ab", "abc", "abcd"] {
        lix.update_file("file-1", text).await.unwrap();
    }
    lix.settled().await.unwrap();

    let working = lix.changes(ChangeFilter::uncommitted()).await.unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].operation, Operation::Create);
    assert_eq!(working[0].value.get_str("text"), Some("abcd"));
}

#[tokio::test]
async fn test_undo_collapses_to_no_change() {
    let lix = text_lix().await;
    lix.insert_file(LixFile::with_id("file-1", "notes", "original"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "base").await.unwrap();

    lix.update_file("file-1", "edited").await.unwrap();
    lix.settled().await.unwrap();
    assert_eq!(lix.changes(ChangeFilter::uncommitted()).await.unwrap().len(), 1);

    lix.update_file("file-1", "original").await.unwrap();
    lix.settled().await.unwrap();
    assert!(lix.changes(ChangeFilter::uncommitted()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_then_restore_collapses_to_no_change() {
    let lix = pairs_lix().await;
    lix.insert_file(LixFile::with_id("file-1", "/settings.pairs", "a=1\n"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "base").await.unwrap();

    lix.delete_file("file-1").await.unwrap();
    lix.settled().await.unwrap();
    let working = lix.changes(ChangeFilter::uncommitted()).await.unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].operation, Operation::Delete);

    lix.insert_file(LixFile::with_id("file-1", "/settings.pairs", "a=1\n"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    assert!(lix.changes(ChangeFilter::uncommitted()).await.unwrap().is_empty());
    assert_eq!(contents(&lix, "file-1").await, "a=1\n");
}

#[tokio::test]
async fn test_lineage_points_at_same_entity() {
    let lix = pairs_lix().await;
    let file = lix
        .insert_file(LixFile::new("/settings.pairs", "a=1\nb=1\n"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "base").await.unwrap();

    lix.update_file(&file.id, "a=2\nb=1\nc=1\n").await.unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "edit").await.unwrap();

    for change in lix.changes(ChangeFilter::file(file.id.clone())).await.unwrap() {
        if let Some(parent_id) = &change.parent_id {
            let parent = lix.change(parent_id).await.unwrap().unwrap();
            assert_eq!(parent.entity_key(), change.entity_key());
            assert!(parent.created_at <= change.created_at);
        }
    }
}

#[tokio::test]
async fn test_branch_merge_and_resolution() {
    let lix = pairs_lix().await;
    let file = lix
        .insert_file(LixFile::new("/settings.pairs", "color=red\nsize=m\n"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "base").await.unwrap();
    lix.create_branch("feature", None).await.unwrap();

    lix.switch_branch("feature").await.unwrap();
    lix.update_file(&file.id, "color=blue\nsize=l\n").await.unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "feature").await.unwrap();

    lix.switch_branch(DEFAULT_BRANCH).await.unwrap();
    assert_eq!(contents(&lix, &file.id).await, "color=red\nsize=m\n");
    lix.update_file(&file.id, "color=green\nsize=m\n").await.unwrap();
    lix.settled().await.unwrap();
    lix.commit("tester", "main").await.unwrap();

    let report = lix.merge("feature").await.unwrap();
    assert!(!report.fast_forwarded);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.staged.len(), 1);
    assert_eq!(contents(&lix, &file.id).await, "color=green\nsize=l\n");

    let conflict = &report.conflicts[0];
    let target = lix.change(&conflict.change_id).await.unwrap().unwrap();
    assert_eq!(target.value.get_str("value"), Some("green"));

    let resolved = lix
        .resolve_conflict_by_selecting(conflict, &conflict.change_id)
        .await
        .unwrap();
    assert_eq!(resolved.resolved_with_change_id.as_deref(), Some(conflict.change_id.as_str()));
    assert_eq!(contents(&lix, &file.id).await, "color=green\nsize=l\n");
    assert!(lix.conflicts(true).await.unwrap().is_empty());

    lix.commit("tester", "merge feature").await.unwrap();
    let again = lix.merge("feature").await.unwrap();
    assert!(again.conflicts.is_empty());
    assert!(again.staged.is_empty());
}

#[tokio::test]
async fn test_blob_roundtrip_keeps_history() {
    let lix = text_lix().await;
    lix.insert_file(LixFile::with_id("file-1", "test", "hello"))
        .await
        .unwrap();
    lix.settled().await.unwrap();
    let commit = lix.commit("tester", "hello").await.unwrap();

    let blob = lix.to_blob().await.unwrap();
    let copy = Lix::open_from_blob(&blob, vec![Arc::new(MockTextPlugin)], LixConfig::default())
        .await
        .unwrap();

    assert_eq!(copy.id().await.unwrap(), lix.id().await.unwrap());
    assert_eq!(copy.get_commit(&commit.id).await.unwrap(), Some(commit));
    assert_eq!(contents(&copy, "file-1").await, "hello");
}

#[tokio::test]
async fn test_invalid_plugin_sets_rejected() {
    let result = Lix::open_in_memory(vec![Arc::new(MockTextPlugin), Arc::new(MockTextPlugin)]).await;
    assert!(matches!(result, Err(LixError::PluginConfiguration(_))));
}
