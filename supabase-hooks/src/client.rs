//! The surface this crate needs from a backend client. Querying, auth and realtime delivery all happen on the
//! other side of [`BackendClient`]; this crate only describes requests and consumes results.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tablecache::{AuthChangeEvent, ChangeAction, Row, RowError, Session};

pub type AuthCallback = Box<dyn Fn(AuthChangeEvent, Option<Session>)>;
pub type RealtimeCallback = Box<dyn Fn(RealtimePayload)>;

pub trait BackendClient {
    /// The session the client already holds, if any.
    fn current_session(&self) -> Option<Session>;

    fn on_auth_state_change(&self, callback: AuthCallback) -> Box<dyn AuthSubscription>;

    /// Runs a read. On success the data is whatever the query selects (for a plain table read, an array of rows).
    fn execute(&self, query: &Query) -> LocalBoxFuture<'_, Result<Value, QueryError>>;

    fn mutate(&self, mutation: &Mutation) -> LocalBoxFuture<'_, Result<Value, QueryError>>;

    /// Opens a realtime channel for row changes on `table`.
    fn subscribe(
        &self,
        table: &str,
        callback: RealtimeCallback,
    ) -> LocalBoxFuture<'_, Result<Box<dyn RealtimeSubscription>, QueryError>>;
}

/// Handle for an auth-state listener. Calling `unsubscribe` more than once is fine.
pub trait AuthSubscription {
    fn unsubscribe(&mut self);
}

/// Handle for a realtime channel. Calling `unsubscribe` more than once is fine.
pub trait RealtimeSubscription {
    fn unsubscribe(&mut self);
}

/// PostgREST-style error object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Error {code}: {message}")]
pub struct QueryError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl QueryError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    pub columns: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn filter(mut self, column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value)
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value)
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value)
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value)
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Stable cache key: an xxh3 hash of the query's JSON form.
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!("{:016x}", xxhash_rust::xxh3::xxh3_64(canonical.as_bytes()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
    Insert { rows: Vec<Value> },
    Upsert { rows: Vec<Value> },
    Update { values: serde_json::Map<String, Value>, filters: Vec<Filter> },
    Delete { filters: Vec<Filter> },
}

/// A write against one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub table: String,
    #[serde(flatten)]
    pub kind: MutationKind,
}

impl Mutation {
    pub fn insert(table: impl Into<String>, rows: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            kind: MutationKind::Insert { rows },
        }
    }

    pub fn upsert(table: impl Into<String>, rows: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            kind: MutationKind::Upsert { rows },
        }
    }

    pub fn update(table: impl Into<String>, values: serde_json::Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            kind: MutationKind::Update {
                values,
                filters: Vec::new(),
            },
        }
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: MutationKind::Delete {
                filters: Vec::new(),
            },
        }
    }

    /// Restricts an update or delete to rows where `column` equals `value`. Ignored for inserts and upserts.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let filter = Filter {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        };
        match &mut self.kind {
            MutationKind::Update { filters, .. } | MutationKind::Delete { filters } => {
                filters.push(filter)
            }
            MutationKind::Insert { .. } | MutationKind::Upsert { .. } => {
                log::warn!("Ignoring filter on insert into `{}`", self.table);
            }
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub enum RealtimeEventType {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(other)]
    Other,
}

/// One row-level change delivered over a realtime channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimePayload {
    #[serde(rename = "eventType")]
    pub event_type: RealtimeEventType,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl RealtimePayload {
    pub fn insert(new: Value) -> Self {
        Self {
            event_type: RealtimeEventType::Insert,
            new,
            old: Value::Null,
        }
    }

    pub fn update(new: Value, old: Value) -> Self {
        Self {
            event_type: RealtimeEventType::Update,
            new,
            old,
        }
    }

    pub fn delete(old: Value) -> Self {
        Self {
            event_type: RealtimeEventType::Delete,
            new: Value::Null,
            old,
        }
    }

    /// The cache action this change calls for. `Ok(None)` for event types the cache doesn't track.
    pub fn into_action(self, table: &str) -> Result<Option<ChangeAction>, RowError> {
        let table = table.to_string();
        let action = match self.event_type {
            RealtimeEventType::Insert => ChangeAction::Insert {
                table,
                row: Row::from_json(self.new)?,
            },
            RealtimeEventType::Update => ChangeAction::Update {
                table,
                row: Row::from_json(self.new)?,
            },
            RealtimeEventType::Delete => ChangeAction::Delete {
                table,
                row: Row::from_json(self.old)?,
            },
            RealtimeEventType::Other => return Ok(None),
        };
        Ok(Some(action))
    }
}
