//! This is a library for keeping a local copy of backend tables in sync with a realtime change feed.
//! It was written for the supabase-hooks binding layer, so it only models what that layer needs.
//!
//! Syncing strategy:
//! 1. A table is fetched once in bulk. The result replaces whatever the cache held for that table.
//! 2. After that, the backend pushes row-level changes (insert, update, delete), keyed by the row's `id`.
//! 3. Each change is turned into a [`ChangeAction`](data_model::ChangeAction) and run through a pure reducer,
//!    which produces a new cache. Tables the change didn't touch are shared with the old cache, so readers
//!    can detect changes by pointer comparison.
//! 4. Readers hold snapshots and get notified when a table they care about changed.
//!
//! The authenticated user lives next to the cache in a [`SessionHolder`](data_model::SessionHolder), which is
//! fed by the backend's auth-state events.

pub mod data_model;

pub use data_model::{
    AuthChangeEvent, CacheError, ChangeAction, FetchState, ListenerKey, Row, RowError, RowId,
    Session, SessionHolder, TableCache, TableRows, TableStore, User, reduce,
};
