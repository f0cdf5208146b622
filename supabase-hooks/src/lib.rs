//! Binds a view layer to a Supabase-style backend.
//!
//! A [`SupabaseProvider`] owns the backend client, the signed-in user and a cache of fetched tables. Code that
//! runs inside [`SupabaseProvider::provide`] reaches it through the hooks:
//!
//! - [`use_supabase`] and [`use_user`] read the client and the current user.
//! - [`use_table`] fetches a whole table once and keeps it current from the table's realtime channel.
//! - [`use_query`] runs one read and reports `{data, error, is_validating}`.
//! - [`use_mutation`] runs writes and reports `{data, loading, error}`.
//!
//! Everything is single-threaded: the provider lives on one thread and hooks hand out futures that are driven by
//! whatever executor the application uses.

mod client;
mod config;
mod context;
mod error;
mod mutation;
mod query;
mod table;
mod utils;

#[cfg(any(test, feature = "local-backend"))]
pub mod memory;

pub use client::{
    AuthCallback, AuthSubscription, BackendClient, Filter, FilterOp, Mutation, MutationKind, Order,
    Query, QueryError, RealtimeCallback, RealtimeEventType, RealtimePayload, RealtimeSubscription,
};
pub use config::ProviderOptions;
pub use context::{
    SupabaseContext, SupabaseProvider, try_use_context, use_supabase, use_user,
};
pub use error::HookError;
pub use mutation::{MutationHandle, use_mutation};
pub use query::{QueryHandle, use_query};
pub use table::{TableHandle, use_table};
pub use utils::{init_logging, set_panic_hook};

pub use tablecache::{
    AuthChangeEvent, CacheError, ChangeAction, FetchState, ListenerKey, Row, RowError, RowId,
    Session, TableCache, TableRows, User,
};
