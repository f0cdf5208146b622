#[path = "1-row.rs"]
mod row;

#[path = "2-change-action.rs"]
mod change_action;

#[path = "3-table-cache.rs"]
mod table_cache;

#[path = "4-fetch-state.rs"]
mod fetch_state;

#[path = "5-dirty-tracker.rs"]
mod dirty_tracker;

#[path = "6-session.rs"]
mod session;

#[path = "7-table-store.rs"]
mod table_store;

pub use change_action::*;
pub use dirty_tracker::*;
pub use fetch_state::*;
pub use row::*;
pub use session::*;
pub use table_cache::*;
pub use table_store::*;

#[cfg_attr(target_arch = "wasm32", wasm_bindgen::prelude::wasm_bindgen)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ListenerKey(pub(crate) slotmap::DefaultKey);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_after(actions: Vec<ChangeAction>) -> TableCache {
        actions
            .into_iter()
            .try_fold(TableCache::default(), |cache, action| reduce(&cache, action))
            .expect("all actions are valid")
    }

    fn ids(cache: &TableCache, table: &str) -> Vec<i64> {
        cache
            .get(table)
            .map(|rows| rows.iter().map(|row| row.id().get()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_todos_scenario() {
        let fetched = cache_after(vec![ChangeAction::FetchAll {
            table: "todos".to_string(),
            rows: vec![Row::from_json(json!({"id": 1, "done": false})).unwrap()],
        }]);
        assert_eq!(fetched.to_json(), json!({"todos": [{"id": 1, "done": false}]}));

        let updated = reduce(
            &fetched,
            ChangeAction::Update {
                table: "todos".to_string(),
                row: Row::from_json(json!({"id": "1", "done": true})).unwrap(),
            },
        )
        .unwrap();
        assert_eq!(updated.to_json(), json!({"todos": [{"id": 1, "done": true}]}));

        let deleted = reduce(
            &updated,
            ChangeAction::Delete {
                table: "todos".to_string(),
                row: Row::from_json(json!({"id": 1})).unwrap(),
            },
        )
        .unwrap();
        assert_eq!(deleted.to_json(), json!({"todos": []}));

        let inserted = reduce(
            &deleted,
            ChangeAction::Insert {
                table: "todos".to_string(),
                row: Row::from_json(json!({"id": 2, "done": false})).unwrap(),
            },
        )
        .unwrap();
        assert_eq!(inserted.to_json(), json!({"todos": [{"id": 2, "done": false}]}));
    }

    #[test]
    fn test_replay_matches_model() {
        let row = |id: i64| Row::from_json(json!({"id": id, "v": id * 10})).unwrap();
        let table = || "items".to_string();

        let cache = cache_after(vec![
            ChangeAction::FetchAll {
                table: table(),
                rows: vec![row(1), row(2), row(3)],
            },
            ChangeAction::Insert { table: table(), row: row(4) },
            ChangeAction::Delete { table: table(), row: row(2) },
            ChangeAction::Insert { table: table(), row: row(5) },
            ChangeAction::Update {
                table: table(),
                row: Row::from_json(json!({"id": "3", "v": -1})).unwrap(),
            },
            ChangeAction::Delete { table: table(), row: row(1) },
        ]);

        assert_eq!(ids(&cache, "items"), vec![3, 4, 5]);
        assert_eq!(
            cache.get("items").unwrap()[0],
            Row::from_json(json!({"id": 3, "v": -1})).unwrap()
        );
    }

    #[test]
    fn test_random_changes_match_model() {
        use rand::{Rng, SeedableRng};
        use serde_json::Value;
        use std::sync::Arc;

        let row = |id: i64, v: i64| Row::from_json(json!({"id": id, "v": v})).unwrap();
        let table = || "items".to_string();

        for seed in 0..32 {
            let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
            let mut model: Vec<(i64, i64)> = (1..=5).map(|id| (id, 0)).collect();
            let mut cache = cache_after(vec![ChangeAction::FetchAll {
                table: table(),
                rows: model.iter().map(|&(id, v)| row(id, v)).collect(),
            }]);

            for step in 1..=200i64 {
                let id = rng.random_range(1..=12i64);
                let present = model.iter().position(|&(existing, _)| existing == id);
                let op = rng.random_range(0..3u8);
                let action = match op {
                    0 => ChangeAction::Insert { table: table(), row: row(id, step) },
                    1 => ChangeAction::Update { table: table(), row: row(id, step) },
                    _ => ChangeAction::Delete { table: table(), row: row(id, 0) },
                };

                let before = cache.get("items").cloned().unwrap();
                match (op, present) {
                    (0, Some(_)) => {
                        assert_eq!(
                            reduce(&cache, action),
                            Err(CacheError::DuplicateRow { table: table(), id: RowId::new(id) })
                        );
                        continue;
                    }
                    (0, None) => model.push((id, step)),
                    (1, Some(index)) => model[index].1 = step,
                    (_, Some(index)) => {
                        model.remove(index);
                    }
                    _ => {}
                }

                cache = reduce(&cache, action).unwrap();
                let after = cache.get("items").unwrap();
                if present.is_none() && op != 0 {
                    assert!(Arc::ptr_eq(&before, after), "seed {seed} step {step}");
                }
                let actual: Vec<(i64, i64)> = after
                    .iter()
                    .map(|row| (row.id().get(), row.get("v").and_then(Value::as_i64).unwrap()))
                    .collect();
                assert_eq!(actual, model, "seed {seed} step {step}");
            }
        }
    }

    #[test]
    fn test_independent_tables() {
        let cache = cache_after(vec![
            ChangeAction::FetchAll {
                table: "a".to_string(),
                rows: vec![Row::from_json(json!({"id": 1})).unwrap()],
            },
            ChangeAction::FetchAll {
                table: "b".to_string(),
                rows: vec![Row::from_json(json!({"id": 1})).unwrap()],
            },
            ChangeAction::Delete {
                table: "a".to_string(),
                row: Row::from_json(json!({"id": 1})).unwrap(),
            },
        ]);

        assert_eq!(ids(&cache, "a"), Vec::<i64>::new());
        assert_eq!(ids(&cache, "b"), vec![1]);
    }
}
