//! Built-in plugins of the command-line tool

use std::collections::BTreeMap;

use lix_core::prelude::*;

/// Tracks plain text files line by line.
///
/// Line `n` (zero based) is the entity `line-{n}` with the snapshot
/// `{"id": "line-{n}", "text": ...}`. Inserting a line therefore shows up as
/// updates of every following line, which is what a positional diff gives.
pub struct LinePlugin;

const ENTITY_TYPE: &str = "line";

impl LinePlugin {
    fn lines(file: Option<&LixFile>) -> Vec<String> {
        file.map(|file| {
            String::from_utf8_lossy(&file.data)
                .lines()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
    }

    fn snapshot(index: usize, text: &str) -> EntitySnapshot {
        EntitySnapshot::new(format!("line-{}", index)).with("text", text)
    }

    fn index(entity_id: &str) -> Result<usize> {
        entity_id
            .strip_prefix("line-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| LixError::plugin("line", format!("Not a line entity: {}", entity_id)))
    }
}

impl LixPlugin for LinePlugin {
    fn key(&self) -> &str {
        "line"
    }

    fn glob(&self) -> &str {
        "*"
    }

    fn diff_file(&self, old: Option<&LixFile>, neu: Option<&LixFile>) -> Result<Vec<DiffReport>> {
        let old = Self::lines(old);
        let neu = Self::lines(neu);

        let mut reports = Vec::new();
        for index in 0..old.len().max(neu.len()) {
            match (old.get(index), neu.get(index)) {
                (None, Some(text)) => {
                    reports.push(DiffReport::create(ENTITY_TYPE, Self::snapshot(index, text)))
                }
                (Some(before), Some(text)) if before != text => reports.push(DiffReport::update(
                    ENTITY_TYPE,
                    Self::snapshot(index, before),
                    Self::snapshot(index, text),
                )),
                (Some(before), None) => {
                    reports.push(DiffReport::delete(ENTITY_TYPE, Self::snapshot(index, before)))
                }
                _ => {}
            }
        }
        Ok(reports)
    }

    fn apply_changes(&self, changes: &[Change], file: &LixFile) -> Result<Vec<u8>> {
        let mut lines: BTreeMap<usize, String> =
            Self::lines(Some(file)).into_iter().enumerate().collect();

        for change in changes.iter().filter(|c| c.entity_type == ENTITY_TYPE) {
            let index = Self::index(change.entity_id())?;
            match change.operation {
                Operation::Delete => {
                    lines.remove(&index);
                }
                Operation::Create | Operation::Update => {
                    let text = change.value.get_str("text").unwrap_or_default();
                    lines.insert(index, text.to_string());
                }
            }
        }

        let mut rendered = lines.into_values().collect::<Vec<_>>().join("\n");
        if !rendered.is_empty() {
            rendered.push('\n');
        }
        Ok(rendered.into_bytes())
    }
}
