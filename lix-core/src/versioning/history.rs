//! Lineage queries over the commit chain and change parents

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};

use crate::database::codec::{self, CHANGE_COLUMNS};
use crate::error::Result;
use crate::schema::{Change, Commit, EntityKey};

/// Commits reachable from `head` with their distance, head first
const ANCESTRY_CTE: &str = "WITH RECURSIVE ancestry(id, parent_id, depth) AS ( \
     SELECT id, parent_id, 0 FROM \"commit\" WHERE id = ?1 \
     UNION ALL \
     SELECT c.id, c.parent_id, a.depth + 1 FROM \"commit\" c JOIN ancestry a ON c.id = a.parent_id \
 )";

/// Commit ids reachable from `head`, newest first. Empty for the root sentinel.
pub fn commit_ancestry(conn: &Connection, head: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "{} SELECT id FROM ancestry ORDER BY depth",
        ANCESTRY_CTE
    ))?;
    let ids = stmt
        .query_map(params![head], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Commits reachable from `head`, newest first, at most `limit`
pub fn commit_history(conn: &Connection, head: &str, limit: Option<usize>) -> Result<Vec<Commit>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "{} SELECT c.id, c.parent_id, c.user_id, c.description, c.created_at \
         FROM ancestry a JOIN \"commit\" c ON c.id = a.id ORDER BY a.depth LIMIT ?2",
        ANCESTRY_CTE
    ))?;
    let commits = stmt
        .query_map(params![head, limit], codec::commit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(commits)
}

/// Whether `ancestor` is `descendant` or reachable from it
pub fn is_ancestor(conn: &Connection, ancestor: &str, descendant: &str) -> Result<bool> {
    if ancestor == descendant || ancestor == crate::schema::ROOT_COMMIT_ID {
        return Ok(true);
    }
    let found: Option<i64> = conn
        .query_row(
            &format!("{} SELECT 1 FROM ancestry WHERE id = ?2", ANCESTRY_CTE),
            params![descendant, ancestor],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Committed changes reachable from `head`, newest commit first
pub fn reachable_changes(conn: &Connection, head: &str) -> Result<Vec<Change>> {
    let columns = CHANGE_COLUMNS
        .split(", ")
        .map(|column| format!("change.{}", column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "{} SELECT {} FROM change JOIN ancestry ON change.commit_id = ancestry.id \
         ORDER BY ancestry.depth, change.created_at DESC",
        ANCESTRY_CTE, columns
    ))?;
    let changes = stmt
        .query_map(params![head], codec::change_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(changes)
}

/// Leaf change per entity at `head`: the change of the newest commit touching it
pub fn leaf_changes(conn: &Connection, head: &str) -> Result<HashMap<EntityKey, Change>> {
    let mut leaves = HashMap::new();
    for change in reachable_changes(conn, head)? {
        leaves.entry(change.entity_key()).or_insert(change);
    }
    Ok(leaves)
}

/// Ids of every change in the lineage of `head`, grouped by entity.
///
/// Covers the changes of all reachable commits plus every change they descend
/// from along `parent_id`, including parents committed on other branches.
pub fn lineage_ids_by_entity(
    conn: &Connection,
    head: &str,
) -> Result<HashMap<EntityKey, HashSet<String>>> {
    let mut stmt = conn.prepare(&format!(
        "{}, lineage(id) AS ( \
             SELECT change.id FROM change JOIN ancestry ON change.commit_id = ancestry.id \
             UNION \
             SELECT change.parent_id FROM change JOIN lineage ON change.id = lineage.id \
             WHERE change.parent_id IS NOT NULL \
         ) \
         SELECT {} FROM change WHERE id IN (SELECT id FROM lineage)",
        ANCESTRY_CTE, CHANGE_COLUMNS
    ))?;
    let changes = stmt
        .query_map(params![head], codec::change_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut ids: HashMap<EntityKey, HashSet<String>> = HashMap::new();
    for change in changes {
        ids.entry(change.entity_key()).or_default().insert(change.id);
    }
    Ok(ids)
}

/// Most recent committed change of one entity reachable from `head`
pub fn leaf_committed_change(conn: &Connection, head: &str, key: &EntityKey) -> Result<Option<Change>> {
    let columns = CHANGE_COLUMNS
        .split(", ")
        .map(|column| format!("change.{}", column))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(conn
        .query_row(
            &format!(
                "{} SELECT {} FROM change JOIN ancestry ON change.commit_id = ancestry.id \
                 WHERE change.file_id = ?2 AND change.plugin_key = ?3 AND change.type = ?4 AND change.entity_id = ?5 \
                 ORDER BY ancestry.depth, change.created_at DESC LIMIT 1",
                ANCESTRY_CTE, columns
            ),
            params![head, key.file_id, key.plugin_key, key.entity_type, key.entity_id],
            codec::change_from_row,
        )
        .optional()?)
}

/// `change_id` followed by its ancestors along `parent_id`, at most `depth` entries.
///
/// Stops at the first missing parent. `None` walks the whole lineage.
pub fn change_lineage(conn: &Connection, change_id: &str, depth: Option<usize>) -> Result<Vec<Change>> {
    let mut lineage = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(change_id.to_string());

    while let Some(id) = next {
        if depth.is_some_and(|depth| lineage.len() >= depth) || !seen.insert(id.clone()) {
            break;
        }
        match codec::get_change(conn, &id)? {
            Some(change) => {
                next = change.parent_id.clone();
                lineage.push(change);
            }
            None => break,
        }
    }
    Ok(lineage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::migrate;
    use crate::schema::{EntitySnapshot, NewChange, Operation, ROOT_COMMIT_ID};
    use chrono::Utc;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn commit(conn: &Connection, id: &str, parent: &str) {
        codec::insert_commit(
            conn,
            &Commit {
                id: id.into(),
                parent_id: parent.into(),
                user_id: "tester".into(),
                description: id.into(),
                created_at: Utc::now(),
            },
        )
        .unwrap();
    }

    fn change(conn: &Connection, id: &str, parent: Option<&str>, commit_id: &str, text: &str) {
        let mut change = NewChange {
            id: Some(id.into()),
            parent_id: parent.map(str::to_string),
            entity_type: "text".into(),
            file_id: "f".into(),
            plugin_key: "mock".into(),
            operation: Operation::Update,
            value: EntitySnapshot::new("e").with("text", text),
            meta: None,
        }
        .into_change();
        change.commit_id = Some(commit_id.into());
        codec::insert_change(conn, &change).unwrap();
    }

    #[test]
    fn test_ancestry_and_history() {
        let conn = conn();
        commit(&conn, "c1", ROOT_COMMIT_ID);
        commit(&conn, "c2", "c1");
        commit(&conn, "c3", "c2");

        assert_eq!(commit_ancestry(&conn, "c3").unwrap(), vec!["c3", "c2", "c1"]);
        assert!(commit_ancestry(&conn, ROOT_COMMIT_ID).unwrap().is_empty());

        let history = commit_history(&conn, "c3", Some(2)).unwrap();
        assert_eq!(
            history.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["c3", "c2"]
        );
        assert!(is_ancestor(&conn, "c1", "c3").unwrap());
        assert!(is_ancestor(&conn, ROOT_COMMIT_ID, "c3").unwrap());
        assert!(!is_ancestor(&conn, "c3", "c1").unwrap());
    }

    #[test]
    fn test_leaf_is_newest_commit_on_the_chain() {
        let conn = conn();
        commit(&conn, "c1", ROOT_COMMIT_ID);
        commit(&conn, "c2", "c1");
        commit(&conn, "side", "c1");
        change(&conn, "a", None, "c1", "one");
        change(&conn, "b", Some("a"), "c2", "two");
        change(&conn, "x", Some("a"), "side", "other");

        let leaves = leaf_changes(&conn, "c2").unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves.values().next().unwrap().id, "b");

        let key = leaves.keys().next().unwrap().clone();
        assert_eq!(leaf_committed_change(&conn, "side", &key).unwrap().unwrap().id, "x");
        assert_eq!(leaf_committed_change(&conn, "c1", &key).unwrap().unwrap().id, "a");
        assert!(leaf_committed_change(&conn, ROOT_COMMIT_ID, &key).unwrap().is_none());

        let ids = lineage_ids_by_entity(&conn, "c2").unwrap();
        assert_eq!(ids[&key].len(), 2);
        let side = lineage_ids_by_entity(&conn, "side").unwrap();
        assert!(side[&key].contains("a") && side[&key].contains("x"));
        assert!(!side[&key].contains("b"));
    }

    #[test]
    fn test_change_lineage_depth() {
        let conn = conn();
        commit(&conn, "c1", ROOT_COMMIT_ID);
        change(&conn, "a", None, "c1", "one");
        change(&conn, "b", Some("a"), "c1", "two");
        change(&conn, "c", Some("b"), "c1", "three");

        let full = change_lineage(&conn, "c", None).unwrap();
        assert_eq!(full.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c", "b", "a"]);
        assert_eq!(change_lineage(&conn, "c", Some(1)).unwrap().len(), 1);
        assert!(change_lineage(&conn, "missing", None).unwrap().is_empty());
    }
}
