use tablecache::{CacheError, RowError};

use crate::client::QueryError;

/// The error a hook reports in its state. Hooks never return these as `Err` past their own boundary.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("unexpected row shape: {0}")]
    Row(#[from] RowError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("could not decode query result: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for HookError {
    fn from(error: serde_json::Error) -> Self {
        HookError::Decode(error.to_string())
    }
}
