use std::collections::HashMap;
use std::sync::Arc;

use crate::data_model::{
    CacheError, ChangeAction, DirtyState, ListenerKey, TableCache, TableRows, reduce,
};

/// Owns the current [`TableCache`]. All changes go through [`TableStore::dispatch`].
#[derive(Default)]
pub struct TableStore {
    cache: TableCache,
    dirty: HashMap<String, DirtyState>,
    fetched_at: HashMap<String, chrono::DateTime<chrono::Utc>>,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, Arc<dyn Fn(ListenerKey, String)>>,
}

impl TableStore {
    pub fn snapshot(&self) -> TableCache {
        self.cache.clone()
    }

    pub fn rows(&self, table: &str) -> Option<TableRows> {
        self.cache.get(table).cloned()
    }

    pub fn is_fetched(&self, table: &str) -> bool {
        self.cache.contains(table)
    }

    /// When the table's rows were last replaced by a bulk read.
    pub fn fetched_at(&self, table: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.fetched_at.get(table).copied()
    }

    pub fn dispatch(&mut self, action: ChangeAction) -> Result<(), CacheError> {
        self.dispatch_from(action, None)
    }

    /// Like [`TableStore::dispatch`], but `modifier` won't be notified about the change it made.
    pub fn dispatch_from(
        &mut self,
        action: ChangeAction,
        modifier: Option<ListenerKey>,
    ) -> Result<(), CacheError> {
        let is_fetch = matches!(action, ChangeAction::FetchAll { .. });
        let table = action.table().to_string();

        let next = reduce(&self.cache, action)?;
        for changed in self.cache.changed_tables(&next) {
            self.dirty.entry(changed).or_default().mark(modifier);
        }
        if is_fetch {
            self.fetched_at.insert(table, chrono::Utc::now());
        }
        self.cache = next;
        Ok(())
    }

    /// The listener is invoked with the table name whenever a table's rows change.
    pub fn register_listener(
        &mut self,
        listener: impl Fn(ListenerKey, String) + 'static,
    ) -> ListenerKey {
        let key = self.listeners.insert(Arc::new(listener));
        ListenerKey(key)
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key.0);
    }

    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let mut notifications: Vec<Box<dyn FnOnce()>> = Vec::new();
        for (table, state) in self.dirty.iter_mut() {
            let Some(exclude_key) = state.take() else {
                continue;
            };

            for (key, listener) in self.listeners.iter() {
                let listener_key = ListenerKey(key);
                if exclude_key == Some(listener_key) {
                    continue;
                }
                let listener = listener.clone();
                let table = table.clone();
                notifications.push(Box::new(move || listener(listener_key, table)));
            }
        }
        self.dirty.clear();
        notifications
    }
}
