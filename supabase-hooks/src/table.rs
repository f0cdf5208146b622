use std::cell::{Cell, RefCell};

use tablecache::{FetchState, ListenerKey, TableRows};

use crate::context::{SupabaseContext, expect_context};
use crate::error::HookError;

/// Rows of one table, fetched once and then kept current by the table's realtime channel.
///
/// The handle holds its share of the realtime channel until it is released or dropped.
pub struct TableHandle {
    context: SupabaseContext,
    table: String,
    status: RefCell<FetchState<(), HookError>>,
    holding_realtime: Cell<bool>,
    listeners: RefCell<Vec<ListenerKey>>,
}

/// Binds to `table` in the current provider. Call [`TableHandle::load`] to fetch it and start receiving changes.
pub fn use_table(table: impl Into<String>) -> TableHandle {
    expect_context("use_table").table(table)
}

impl SupabaseContext {
    pub fn table(&self, table: impl Into<String>) -> TableHandle {
        let table = table.into();
        let status = if self.is_fetched(&table) {
            FetchState::Success(())
        } else {
            FetchState::loading()
        };
        TableHandle {
            context: self.clone(),
            table,
            status: RefCell::new(status),
            holding_realtime: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl TableHandle {
    pub fn name(&self) -> &str {
        &self.table
    }

    /// The table's current rows, or `None` until it has been fetched.
    pub fn data(&self) -> Option<TableRows> {
        self.context.rows(&self.table)
    }

    pub fn loading(&self) -> bool {
        self.status.borrow().is_loading()
    }

    pub fn error(&self) -> Option<HookError> {
        self.status.borrow().error().cloned()
    }

    /// Fetches the table unless the provider already has it, then joins its realtime channel.
    ///
    /// The channel is only joined once the rows are in the cache, so changes never arrive for a table
    /// that hasn't been fetched. A failed fetch leaves the error in [`TableHandle::error`] and opens no channel.
    /// Handles loading the same table at the same time share one read. Calling `load` again reconnects a
    /// channel whose earlier connection attempt was abandoned.
    pub async fn load(&self) {
        if self.context.is_fetched(&self.table) {
            self.status.borrow_mut().resolve(Ok(()));
        } else {
            let outcome = self.context.fetch_table(&self.table).await;
            if let Err(e) = &outcome {
                log::error!("Failed to load table `{}`: {e}", self.table);
            }
            self.status.borrow_mut().resolve(outcome);
        }

        if !self.context.options().realtime || !self.context.is_fetched(&self.table) {
            return;
        }
        if !self.holding_realtime.replace(true) {
            self.context.join_realtime(&self.table);
        }
        self.context.connect_realtime(&self.table).await;
    }

    /// The listener is invoked with the table's rows every time they change.
    pub fn on_change(&self, listener: impl Fn(Option<TableRows>) + 'static) -> ListenerKey {
        let table = self.table.clone();
        let context = self.context.downgrade();
        let key = self.context.on_table_change(move |_, changed| {
            if changed != table {
                return;
            }
            if let Some(context) = context.upgrade() {
                listener(context.rows(&table));
            }
        });
        self.listeners.borrow_mut().push(key);
        key
    }

    /// Gives up this handle's share of the realtime channel. Safe to call repeatedly, and safe to call
    /// while the channel is still being established.
    pub fn release(&self) {
        if self.holding_realtime.replace(false) {
            self.context.release_realtime(&self.table);
        }
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        self.release();
        for key in self.listeners.take() {
            self.context.remove_table_listener(key);
        }
    }
}
