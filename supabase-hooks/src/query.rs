use std::cell::RefCell;

use serde::de::DeserializeOwned;
use tablecache::FetchState;

use crate::client::Query;
use crate::context::{SupabaseContext, expect_context};
use crate::error::HookError;

/// The result of one query, keyed by the query itself.
///
/// If the provider has a result for the same query from earlier, the handle starts out serving it as stale
/// data while [`QueryHandle::fetch`] revalidates.
pub struct QueryHandle<T> {
    context: SupabaseContext,
    query: Query,
    key: String,
    state: RefCell<FetchState<T, HookError>>,
}

pub fn use_query<T: DeserializeOwned + Clone>(query: Query) -> QueryHandle<T> {
    expect_context("use_query").query(query)
}

impl SupabaseContext {
    pub fn query<T: DeserializeOwned + Clone>(&self, query: Query) -> QueryHandle<T> {
        let key = query.cache_key();
        let stale = self
            .options()
            .cache_queries
            .then(|| self.cached_query(&key))
            .flatten()
            .and_then(|value| {
                serde_json::from_value::<T>(value)
                    .inspect_err(|e| log::warn!("Discarding cached result for `{}`: {e}", query.table))
                    .ok()
            });
        QueryHandle {
            context: self.clone(),
            query,
            key,
            state: RefCell::new(FetchState::Loading { stale }),
        }
    }
}

impl<T: DeserializeOwned + Clone> QueryHandle<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn data(&self) -> Option<T> {
        self.state.borrow().data().cloned()
    }

    pub fn error(&self) -> Option<HookError> {
        self.state.borrow().error().cloned()
    }

    /// True while a request is outstanding (including before the first [`QueryHandle::fetch`]).
    pub fn is_validating(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn state(&self) -> FetchState<T, HookError> {
        self.state.borrow().clone()
    }

    pub async fn fetch(&self) {
        self.state.borrow_mut().begin();

        let client = self.context.client();
        let outcome = match client.execute(&self.query).await {
            Ok(value) => {
                if self.context.options().cache_queries {
                    self.context.store_query(&self.key, value.clone());
                }
                serde_json::from_value::<T>(value).map_err(HookError::from)
            }
            Err(e) => Err(HookError::from(e)),
        };
        if let Err(e) = &outcome {
            log::error!("Query on `{}` failed: {e}", self.query.table);
        }
        self.state.borrow_mut().resolve(outcome);
    }
}
