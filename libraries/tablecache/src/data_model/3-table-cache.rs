//! # TableCache
//! The cache maps table names to the rows currently known for that table.
//! It is persistent: [`reduce`] never modifies the cache it's given, it returns a new one.
//! A table the action didn't touch keeps the exact same `Arc` in the new cache, so
//! `Arc::ptr_eq` tells readers whether a table changed.

use std::sync::Arc;

use crate::data_model::{ChangeAction, Row, RowId};

pub type TableRows = Arc<Vec<Row>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableCache {
    tables: im::HashMap<String, TableRows>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("received a `{action}` for table `{table}` before it was fetched")]
    TableNotFetched { table: String, action: &'static str },
    #[error("table `{table}` already contains a row with id {id}")]
    DuplicateRow { table: String, id: RowId },
}

impl TableCache {
    pub fn get(&self, table: &str) -> Option<&TableRows> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableRows)> {
        self.tables.iter()
    }

    /// Names of the tables whose collection differs (by identity) between the two caches.
    pub fn changed_tables(&self, next: &TableCache) -> Vec<String> {
        let mut changed: Vec<String> = next
            .tables
            .iter()
            .filter(|(table, rows)| {
                self.tables
                    .get(*table)
                    .is_none_or(|previous| !Arc::ptr_eq(previous, rows))
            })
            .map(|(table, _)| table.clone())
            .collect();
        changed.extend(
            self.tables
                .keys()
                .filter(|table| !next.tables.contains_key(*table))
                .cloned(),
        );
        changed.sort();
        changed
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.tables
                .iter()
                .map(|(table, rows)| {
                    (
                        table.clone(),
                        serde_json::Value::Array(rows.iter().map(Row::to_json).collect()),
                    )
                })
                .collect(),
        )
    }

    fn with_table(&self, table: String, rows: Vec<Row>) -> TableCache {
        TableCache {
            tables: self.tables.update(table, Arc::new(rows)),
        }
    }

    fn fetched(&self, table: &str, action: &'static str) -> Result<&TableRows, CacheError> {
        self.tables.get(table).ok_or_else(|| CacheError::TableNotFetched {
            table: table.to_string(),
            action,
        })
    }
}

fn position(rows: &[Row], id: RowId) -> Option<usize> {
    rows.iter().position(|row| row.id() == id)
}

/// Computes the cache that results from applying `action` to `cache`.
pub fn reduce(cache: &TableCache, action: ChangeAction) -> Result<TableCache, CacheError> {
    let kind = action.kind();
    match action {
        ChangeAction::FetchAll { table, rows } => Ok(cache.with_table(table, rows)),
        ChangeAction::Insert { table, row } => {
            let rows = cache.fetched(&table, kind)?;
            if position(rows, row.id()).is_some() {
                return Err(CacheError::DuplicateRow { table, id: row.id() });
            }
            let mut next = Vec::with_capacity(rows.len() + 1);
            next.extend(rows.iter().cloned());
            next.push(row);
            Ok(cache.with_table(table, next))
        }
        ChangeAction::Update { table, row } => {
            let rows = cache.fetched(&table, kind)?;
            let Some(index) = position(rows, row.id()) else {
                log::warn!(
                    "Ignoring update for row {} in table `{table}`: no cached row has that id",
                    row.id()
                );
                return Ok(cache.clone());
            };
            let mut next = rows.as_ref().clone();
            next[index] = row;
            Ok(cache.with_table(table, next))
        }
        ChangeAction::Delete { table, row } => {
            let rows = cache.fetched(&table, kind)?;
            let Some(index) = position(rows, row.id()) else {
                return Ok(cache.clone());
            };
            let mut next = rows.as_ref().clone();
            next.remove(index);
            Ok(cache.with_table(table, next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        Row::from_json(value).unwrap()
    }

    fn fetched(table: &str, rows: Vec<serde_json::Value>) -> TableCache {
        reduce(
            &TableCache::default(),
            ChangeAction::FetchAll {
                table: table.to_string(),
                rows: rows.into_iter().map(row).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_all_replaces_wholesale() {
        let cache = fetched("todos", vec![json!({"id": 1}), json!({"id": 2})]);
        let cache = reduce(
            &cache,
            ChangeAction::FetchAll {
                table: "todos".to_string(),
                rows: vec![row(json!({"id": 3}))],
            },
        )
        .unwrap();
        assert_eq!(cache.to_json(), json!({"todos": [{"id": 3}]}));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let cache = fetched("todos", vec![json!({"id": 1, "done": false})]);
        let before = cache.to_json();
        let _ = reduce(
            &cache,
            ChangeAction::Update {
                table: "todos".to_string(),
                row: row(json!({"id": 1, "done": true})),
            },
        )
        .unwrap();
        let _ = reduce(
            &cache,
            ChangeAction::Insert {
                table: "todos".to_string(),
                row: row(json!({"id": 2})),
            },
        )
        .unwrap();
        assert_eq!(cache.to_json(), before);
    }

    #[test]
    fn test_untouched_tables_keep_identity() {
        let cache = fetched("a", vec![json!({"id": 1})]);
        let cache = reduce(
            &cache,
            ChangeAction::FetchAll {
                table: "b".to_string(),
                rows: vec![row(json!({"id": 1}))],
            },
        )
        .unwrap();

        let actions = vec![
            ChangeAction::Insert {
                table: "a".to_string(),
                row: row(json!({"id": 2})),
            },
            ChangeAction::Update {
                table: "a".to_string(),
                row: row(json!({"id": 1, "x": 1})),
            },
            ChangeAction::Delete {
                table: "a".to_string(),
                row: row(json!({"id": 1})),
            },
            ChangeAction::FetchAll {
                table: "a".to_string(),
                rows: vec![],
            },
        ];
        for action in actions {
            let next = reduce(&cache, action).unwrap();
            assert!(Arc::ptr_eq(cache.get("b").unwrap(), next.get("b").unwrap()));
            assert!(!Arc::ptr_eq(cache.get("a").unwrap(), next.get("a").unwrap()));
            assert_eq!(cache.changed_tables(&next), vec!["a".to_string()]);
        }
    }

    #[test]
    fn test_update_matches_across_id_representations() {
        let cache = fetched("t", vec![json!({"id": 5, "v": 1}), json!({"id": 6, "v": 1})]);
        let next = reduce(
            &cache,
            ChangeAction::Update {
                table: "t".to_string(),
                row: row(json!({"id": "5", "v": 2})),
            },
        )
        .unwrap();
        assert_eq!(next.to_json(), json!({"t": [{"id": 5, "v": 2}, {"id": 6, "v": 1}]}));

        let cache = fetched("t", vec![json!({"id": "5", "v": 1})]);
        let next = reduce(
            &cache,
            ChangeAction::Update {
                table: "t".to_string(),
                row: row(json!({"id": 5, "v": 2})),
            },
        )
        .unwrap();
        assert_eq!(next.to_json(), json!({"t": [{"id": 5, "v": 2}]}));
    }

    #[test]
    fn test_update_keeps_position_and_length() {
        let cache = fetched("t", vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
        let next = reduce(
            &cache,
            ChangeAction::Update {
                table: "t".to_string(),
                row: row(json!({"id": 2, "changed": true})),
            },
        )
        .unwrap();
        assert_eq!(
            next.to_json(),
            json!({"t": [{"id": 1}, {"id": 2, "changed": true}, {"id": 3}]})
        );
    }

    #[test]
    fn test_update_without_match_is_noop() {
        let cache = fetched("t", vec![json!({"id": 1})]);
        let next = reduce(
            &cache,
            ChangeAction::Update {
                table: "t".to_string(),
                row: row(json!({"id": 99})),
            },
        )
        .unwrap();
        assert_eq!(next, cache);
        assert!(Arc::ptr_eq(cache.get("t").unwrap(), next.get("t").unwrap()));
        assert!(cache.changed_tables(&next).is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let cache = fetched("t", vec![json!({"id": 1}), json!({"id": 2})]);
        let delete = || ChangeAction::Delete {
            table: "t".to_string(),
            row: row(json!({"id": "1"})),
        };
        let once = reduce(&cache, delete()).unwrap();
        let twice = reduce(&once, delete()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.to_json(), json!({"t": [{"id": 2}]}));
        assert!(Arc::ptr_eq(once.get("t").unwrap(), twice.get("t").unwrap()));
    }

    #[test]
    fn test_changes_before_fetch_are_rejected() {
        let cache = TableCache::default();
        let err = reduce(
            &cache,
            ChangeAction::Insert {
                table: "todos".to_string(),
                row: row(json!({"id": 1})),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            CacheError::TableNotFetched {
                table: "todos".to_string(),
                action: "insert",
            }
        );

        for action in [
            ChangeAction::Update {
                table: "todos".to_string(),
                row: row(json!({"id": 1})),
            },
            ChangeAction::Delete {
                table: "todos".to_string(),
                row: row(json!({"id": 1})),
            },
        ] {
            assert!(matches!(
                reduce(&cache, action),
                Err(CacheError::TableNotFetched { .. })
            ));
        }
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let cache = fetched("t", vec![json!({"id": 1})]);
        let err = reduce(
            &cache,
            ChangeAction::Insert {
                table: "t".to_string(),
                row: row(json!({"id": "1"})),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            CacheError::DuplicateRow {
                table: "t".to_string(),
                id: RowId::new(1),
            }
        );
    }
}
