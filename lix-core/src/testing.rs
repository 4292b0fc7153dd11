//! Plugins shared by unit tests

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::lix::Lix;
use crate::plugin::{DiffReport, LixPlugin};
use crate::schema::{Change, EntitySnapshot, LixFile, Operation};

/// `key=value` lines, one `pair` entity per key
pub struct KeyValuePlugin;

impl KeyValuePlugin {
    fn parse(data: &[u8]) -> BTreeMap<String, String> {
        String::from_utf8_lossy(data)
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect()
    }

    fn render(pairs: &BTreeMap<String, String>) -> Vec<u8> {
        pairs
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect::<String>()
            .into_bytes()
    }

    fn snapshot(key: &str, value: &str) -> EntitySnapshot {
        EntitySnapshot::new(key).with("value", value)
    }
}

impl LixPlugin for KeyValuePlugin {
    fn key(&self) -> &str {
        "kv"
    }

    fn glob(&self) -> &str {
        "*.kv"
    }

    fn diff_file(&self, old: Option<&LixFile>, neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
        let old = old.map(|f| Self::parse(&f.data)).unwrap_or_default();
        let neu = neu.map(|f| Self::parse(&f.data)).unwrap_or_default();

        let mut reports = Vec::new();
        for (key, value) in &neu {
            match old.get(key) {
                None => reports.push(DiffReport::create("pair", Self::snapshot(key, value))),
                Some(before) if before != value => reports.push(DiffReport::update(
                    "pair",
                    Self::snapshot(key, before),
                    Self::snapshot(key, value),
                )),
                Some(_) => {}
            }
        }
        for (key, value) in &old {
            if !neu.contains_key(key) {
                reports.push(DiffReport::delete("pair", Self::snapshot(key, value)));
            }
        }
        Ok(reports)
    }

    fn apply_changes(&self, changes: &[Change], file: &LixFile) -> Result<Vec<u8>> {
        let mut pairs = Self::parse(&file.data);
        for change in changes {
            let key = change.entity_id().to_string();
            if change.operation == Operation::Delete {
                pairs.remove(&key);
            } else {
                let value = change.value.get_str("value").unwrap_or_default().to_string();
                pairs.insert(key, value);
            }
        }
        Ok(Self::render(&pairs))
    }
}

pub async fn kv_lix() -> Lix {
    Lix::open_in_memory(vec![Arc::new(KeyValuePlugin)])
        .await
        .unwrap()
}

/// Write `data` to `path`, creating the file on first use, and wait for it to materialize
pub async fn write(lix: &Lix, path: &str, data: &str) -> String {
    let id = match lix.file_by_path(path).await.unwrap() {
        Some(file) => {
            lix.update_file(&file.id, data).await.unwrap();
            file.id
        }
        None => lix.insert_file(LixFile::new(path, data)).await.unwrap().id,
    };
    lix.settled().await.unwrap();
    id
}

pub async fn read(lix: &Lix, path: &str) -> String {
    let file = lix.file_by_path(path).await.unwrap().unwrap();
    String::from_utf8(file.data).unwrap()
}
