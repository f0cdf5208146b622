//! A backend that keeps its tables in memory. It evaluates [`Query`]s and [`Mutation`]s itself and delivers
//! realtime and auth events synchronously, which makes it handy for tests and offline demos.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use std::task::{Poll, Waker};

use futures::future::LocalBoxFuture;
use serde_json::{Map, Value};
use tablecache::{AuthChangeEvent, RowId, Session};

use crate::client::{
    AuthCallback, AuthSubscription, BackendClient, Filter, FilterOp, Mutation, MutationKind, Query,
    QueryError, RealtimeCallback, RealtimePayload, RealtimeSubscription,
};

type AuthListener = Rc<dyn Fn(AuthChangeEvent, Option<Session>)>;
type ChannelListener = Rc<dyn Fn(RealtimePayload)>;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Rc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tables: RefCell<BTreeMap<String, Vec<Value>>>,
    session: RefCell<Option<Session>>,
    auth_listeners: RefCell<slotmap::SlotMap<slotmap::DefaultKey, AuthListener>>,
    channels: RefCell<slotmap::SlotMap<slotmap::DefaultKey, (String, ChannelListener)>>,
    failures: RefCell<VecDeque<QueryError>>,
    reads: Cell<usize>,
    hold_reads: Cell<bool>,
    hold_subscriptions: Cell<bool>,
    held: RefCell<Vec<Waker>>,
}

struct MemoryChannel {
    backend: Weak<MemoryInner>,
    key: Option<slotmap::DefaultKey>,
}

impl RealtimeSubscription for MemoryChannel {
    fn unsubscribe(&mut self) {
        if let (Some(key), Some(backend)) = (self.key.take(), self.backend.upgrade()) {
            backend.channels.borrow_mut().remove(key);
        }
    }
}

struct MemoryAuthSubscription {
    backend: Weak<MemoryInner>,
    key: Option<slotmap::DefaultKey>,
}

impl AuthSubscription for MemoryAuthSubscription {
    fn unsubscribe(&mut self) {
        if let (Some(key), Some(backend)) = (self.key.take(), self.backend.upgrade()) {
            backend.auth_listeners.borrow_mut().remove(key);
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: impl Into<String>, rows: Vec<Value>) -> Self {
        self.inner.tables.borrow_mut().insert(table.into(), rows);
        self
    }

    pub fn with_session(self, session: Session) -> Self {
        *self.inner.session.borrow_mut() = Some(session);
        self
    }

    /// The table's rows as the backend currently stores them.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .tables
            .borrow()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.inner.reads.get()
    }

    /// Number of realtime channels currently open on `table`.
    pub fn open_channels(&self, table: &str) -> usize {
        self.inner
            .channels
            .borrow()
            .values()
            .filter(|(channel_table, _)| channel_table == table)
            .count()
    }

    pub fn auth_listener_count(&self) -> usize {
        self.inner.auth_listeners.borrow().len()
    }

    /// The next read or write fails with `error`.
    pub fn fail_next(&self, error: QueryError) {
        self.inner.failures.borrow_mut().push_back(error);
    }

    /// While held, `execute` stays pending. The read happens once it is let go.
    pub fn hold_reads(&self, hold: bool) {
        self.inner.hold_reads.set(hold);
        if !hold {
            self.wake_held();
        }
    }

    /// While held, `subscribe` stays pending.
    pub fn hold_subscriptions(&self, hold: bool) {
        self.inner.hold_subscriptions.set(hold);
        if !hold {
            self.wake_held();
        }
    }

    fn wake_held(&self) {
        for waker in self.inner.held.take() {
            waker.wake();
        }
    }

    pub fn sign_in(&self, session: Session) {
        *self.inner.session.borrow_mut() = Some(session.clone());
        self.emit_auth(AuthChangeEvent::SignedIn, Some(session));
    }

    pub fn sign_out(&self) {
        *self.inner.session.borrow_mut() = None;
        self.emit_auth(AuthChangeEvent::SignedOut, None);
    }

    pub fn emit_auth(&self, event: AuthChangeEvent, session: Option<Session>) {
        let listeners: Vec<AuthListener> =
            self.inner.auth_listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(event, session.clone());
        }
    }

    /// Delivers `payload` to every channel open on `table`, without touching the stored rows.
    pub fn emit_realtime(&self, table: &str, payload: RealtimePayload) {
        let listeners: Vec<ChannelListener> = self
            .inner
            .channels
            .borrow()
            .values()
            .filter(|(channel_table, _)| channel_table == table)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(payload.clone());
        }
    }

    fn take_failure(&self) -> Option<QueryError> {
        self.inner.failures.borrow_mut().pop_front()
    }

    fn select(&self, query: &Query) -> Result<Value, QueryError> {
        self.inner.reads.set(self.inner.reads.get() + 1);
        let tables = self.inner.tables.borrow();
        let Some(rows) = tables.get(&query.table) else {
            return Err(missing_table(&query.table));
        };

        let mut selected: Vec<&Value> = rows
            .iter()
            .filter(|row| query.filters.iter().all(|filter| matches(row, filter)))
            .collect();
        if let Some(order) = &query.order {
            selected.sort_by(|a, b| {
                let ordering = compare(&a[order.column.as_str()], &b[order.column.as_str()]);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            selected.truncate(limit);
        }

        let columns: Option<Vec<&str>> = (query.columns.trim() != "*")
            .then(|| query.columns.split(',').map(str::trim).collect());
        Ok(Value::Array(
            selected
                .into_iter()
                .map(|row| project(row, columns.as_deref()))
                .collect(),
        ))
    }

    fn apply(&self, mutation: &Mutation) -> Result<(Value, Vec<RealtimePayload>), QueryError> {
        let mut tables = self.inner.tables.borrow_mut();
        let Some(stored) = tables.get_mut(&mutation.table) else {
            return Err(missing_table(&mutation.table));
        };
        // a failing batch leaves the table as it was
        let mut staged = stored.clone();
        let rows = &mut staged;

        let mut changed = Vec::new();
        let mut events = Vec::new();
        match &mutation.kind {
            MutationKind::Insert { rows: new_rows } => {
                for new_row in new_rows {
                    let new_row = with_id(new_row, rows)?;
                    let id = row_id(&new_row);
                    if id.is_some() && rows.iter().any(|row| row_id(row) == id) {
                        return Err(QueryError::new(
                            "23505",
                            "duplicate key value violates unique constraint",
                        )
                        .with_details(format!("Key (id)=({}) already exists.", new_row["id"])));
                    }
                    rows.push(new_row.clone());
                    events.push(RealtimePayload::insert(new_row.clone()));
                    changed.push(new_row);
                }
            }
            MutationKind::Upsert { rows: new_rows } => {
                for new_row in new_rows {
                    let new_row = with_id(new_row, rows)?;
                    let id = row_id(&new_row);
                    let existing = rows.iter().position(|row| id.is_some() && row_id(row) == id);
                    match existing {
                        Some(index) => {
                            let old = std::mem::replace(&mut rows[index], new_row.clone());
                            events.push(RealtimePayload::update(new_row.clone(), old));
                        }
                        None => {
                            rows.push(new_row.clone());
                            events.push(RealtimePayload::insert(new_row.clone()));
                        }
                    }
                    changed.push(new_row);
                }
            }
            MutationKind::Update { values, filters } => {
                for row in rows.iter_mut() {
                    if !filters.iter().all(|filter| matches(row, filter)) {
                        continue;
                    }
                    let old = row.clone();
                    if let Value::Object(object) = row {
                        object.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    events.push(RealtimePayload::update(row.clone(), old));
                    changed.push(row.clone());
                }
            }
            MutationKind::Delete { filters } => {
                let (removed, kept): (Vec<Value>, Vec<Value>) = std::mem::take(rows)
                    .into_iter()
                    .partition(|row| filters.iter().all(|filter| matches(row, filter)));
                *rows = kept;
                for old in removed {
                    events.push(RealtimePayload::delete(old.clone()));
                    changed.push(old);
                }
            }
        }
        *stored = staged;
        Ok((Value::Array(changed), events))
    }
}

impl BackendClient for MemoryBackend {
    fn current_session(&self) -> Option<Session> {
        self.inner.session.borrow().clone()
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> Box<dyn AuthSubscription> {
        let key = self
            .inner
            .auth_listeners
            .borrow_mut()
            .insert(Rc::from(callback));
        Box::new(MemoryAuthSubscription {
            backend: Rc::downgrade(&self.inner),
            key: Some(key),
        })
    }

    fn execute(&self, query: &Query) -> LocalBoxFuture<'_, Result<Value, QueryError>> {
        let query = query.clone();
        Box::pin(futures::future::poll_fn(move |cx| {
            if self.inner.hold_reads.get() {
                self.inner.held.borrow_mut().push(cx.waker().clone());
                return Poll::Pending;
            }
            Poll::Ready(match self.take_failure() {
                Some(error) => Err(error),
                None => self.select(&query),
            })
        }))
    }

    fn mutate(&self, mutation: &Mutation) -> LocalBoxFuture<'_, Result<Value, QueryError>> {
        let result = match self.take_failure() {
            Some(error) => Err(error),
            None => self.apply(mutation).map(|(data, events)| {
                for event in events {
                    self.emit_realtime(&mutation.table, event);
                }
                data
            }),
        };
        Box::pin(futures::future::ready(result))
    }

    fn subscribe(
        &self,
        table: &str,
        callback: RealtimeCallback,
    ) -> LocalBoxFuture<'_, Result<Box<dyn RealtimeSubscription>, QueryError>> {
        let table = table.to_string();
        let mut callback = Some(callback);
        Box::pin(futures::future::poll_fn(move |cx| {
            if self.inner.hold_subscriptions.get() {
                self.inner.held.borrow_mut().push(cx.waker().clone());
                return Poll::Pending;
            }
            let Some(callback) = callback.take() else {
                return Poll::Ready(Err(QueryError::new(
                    "internal",
                    "subscription polled after completion",
                )));
            };
            let key = self
                .inner
                .channels
                .borrow_mut()
                .insert((table.clone(), Rc::from(callback)));
            let channel: Box<dyn RealtimeSubscription> = Box::new(MemoryChannel {
                backend: Rc::downgrade(&self.inner),
                key: Some(key),
            });
            Poll::Ready(Ok(channel))
        }))
    }
}

fn missing_table(table: &str) -> QueryError {
    QueryError::new(
        "42P01",
        format!("relation \"public.{table}\" does not exist"),
    )
}

fn row_id(row: &Value) -> Option<RowId> {
    RowId::from_json(&row["id"]).ok()
}

/// Gives rows without an `id` the next free numeric one.
fn with_id(row: &Value, existing: &[Value]) -> Result<Value, QueryError> {
    let Value::Object(object) = row else {
        return Err(QueryError::new("22P02", "row must be a JSON object"));
    };
    if object.contains_key("id") {
        return Ok(row.clone());
    }
    let next = existing
        .iter()
        .filter_map(row_id)
        .map(RowId::get)
        .max()
        .unwrap_or(0)
        + 1;
    let mut object = object.clone();
    object.insert("id".to_string(), Value::from(next));
    Ok(Value::Object(object))
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let ordering = compare(&row[filter.column.as_str()], &filter.value);
    let equal = loose_eq(&row[filter.column.as_str()], &filter.value);
    match filter.op {
        FilterOp::Eq => equal,
        FilterOp::Neq => !equal,
        FilterOp::Gt => ordering == Ordering::Greater,
        FilterOp::Gte => ordering != Ordering::Less,
        FilterOp::Lt => ordering == Ordering::Less,
        FilterOp::Lte => ordering != Ordering::Greater,
    }
}

/// Numbers and numeric strings both count as numbers, the way PostgREST reads filter values.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (as_number(a), as_number(b)) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        // nulls sort last, like Postgres' default for ascending order
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn project(row: &Value, columns: Option<&[&str]>) -> Value {
    let (Some(columns), Value::Object(object)) = (columns, row) else {
        return row.clone();
    };
    let projected: Map<String, Value> = columns
        .iter()
        .filter_map(|column| object.get(*column).map(|v| (column.to_string(), v.clone())))
        .collect();
    Value::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    fn todos() -> MemoryBackend {
        MemoryBackend::new().with_table(
            "todos",
            vec![
                json!({"id": 1, "title": "b", "done": false}),
                json!({"id": 2, "title": "a", "done": true}),
                json!({"id": 3, "title": "c", "done": false}),
            ],
        )
    }

    #[test]
    fn test_select_filters_orders_and_limits() {
        let backend = todos();
        let query = Query::from("todos")
            .select("id, title")
            .eq("done", false)
            .order("title", false)
            .limit(1);
        let result = block_on(backend.execute(&query)).unwrap();
        assert_eq!(result, json!([{"id": 3, "title": "c"}]));
        assert_eq!(backend.reads(), 1);
    }

    #[test]
    fn test_select_comparisons() {
        let backend = todos();
        let result = block_on(backend.execute(&Query::from("todos").gte("id", 2).lt("id", 3)))
            .unwrap();
        assert_eq!(result.as_array().map(Vec::len), Some(1));
        assert_eq!(result[0]["id"], json!(2));
    }

    #[test]
    fn test_missing_table() {
        let err = block_on(MemoryBackend::new().execute(&Query::from("nope"))).unwrap_err();
        assert_eq!(err.code, "42P01");
    }

    #[test]
    fn test_insert_assigns_ids_and_emits() {
        let backend = todos();
        let seen: Rc<RefCell<Vec<RealtimePayload>>> = Rc::default();
        let sink = seen.clone();
        let _channel = block_on(backend.subscribe(
            "todos",
            Box::new(move |payload| sink.borrow_mut().push(payload)),
        ))
        .unwrap();

        let inserted = block_on(backend.mutate(&Mutation::insert(
            "todos",
            vec![json!({"title": "d"})],
        )))
        .unwrap();
        assert_eq!(inserted, json!([{"id": 4, "title": "d"}]));
        assert_eq!(*seen.borrow(), vec![RealtimePayload::insert(json!({"id": 4, "title": "d"}))]);
    }

    #[test]
    fn test_update_and_delete_emit_old_rows() {
        let backend = todos();
        let seen: Rc<RefCell<Vec<RealtimePayload>>> = Rc::default();
        let sink = seen.clone();
        let _channel = block_on(backend.subscribe(
            "todos",
            Box::new(move |payload| sink.borrow_mut().push(payload)),
        ))
        .unwrap();

        let mut values = Map::new();
        values.insert("done".to_string(), json!(true));
        block_on(backend.mutate(&Mutation::update("todos", values).eq("id", 1))).unwrap();
        block_on(backend.mutate(&Mutation::delete("todos").eq("id", "2"))).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                RealtimePayload::update(
                    json!({"id": 1, "title": "b", "done": true}),
                    json!({"id": 1, "title": "b", "done": false}),
                ),
                RealtimePayload::delete(json!({"id": 2, "title": "a", "done": true})),
            ]
        );
        assert_eq!(backend.rows("todos").len(), 2);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let backend = todos();
        let err = block_on(backend.mutate(&Mutation::insert("todos", vec![json!({"id": 1})])))
            .unwrap_err();
        assert_eq!(err.code, "23505");
        assert_eq!(backend.rows("todos").len(), 3);
    }

    #[test]
    fn test_failed_batch_changes_nothing() {
        let backend = todos();
        let seen: Rc<RefCell<Vec<RealtimePayload>>> = Rc::default();
        let sink = seen.clone();
        let _channel = block_on(backend.subscribe(
            "todos",
            Box::new(move |payload| sink.borrow_mut().push(payload)),
        ))
        .unwrap();

        let err = block_on(backend.mutate(&Mutation::insert(
            "todos",
            vec![json!({"id": 5}), json!({"id": 1})],
        )))
        .unwrap_err();
        assert_eq!(err.code, "23505");
        assert_eq!(backend.rows("todos").len(), 3);

        let err = block_on(backend.mutate(&Mutation::upsert(
            "todos",
            vec![json!({"id": 1, "title": "z"}), json!("not a row")],
        )))
        .unwrap_err();
        assert_eq!(err.code, "22P02");
        assert_eq!(backend.rows("todos")[0]["title"], json!("b"));

        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_upsert_replaces_or_inserts() {
        let backend = todos();
        block_on(backend.mutate(&Mutation::upsert(
            "todos",
            vec![json!({"id": 1, "title": "z"}), json!({"id": 9, "title": "new"})],
        )))
        .unwrap();
        let rows = backend.rows("todos");
        assert_eq!(rows[0], json!({"id": 1, "title": "z"}));
        assert_eq!(rows[3], json!({"id": 9, "title": "new"}));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let backend = todos();
        let mut channel = block_on(backend.subscribe("todos", Box::new(|_| {}))).unwrap();
        assert_eq!(backend.open_channels("todos"), 1);
        channel.unsubscribe();
        channel.unsubscribe();
        assert_eq!(backend.open_channels("todos"), 0);
    }

    #[test]
    fn test_held_read_sees_later_writes() {
        let backend = todos();
        backend.hold_reads(true);
        let mut read = backend.execute(&Query::from("todos"));
        let mut cx = std::task::Context::from_waker(futures::task::noop_waker_ref());
        assert!(read.as_mut().poll(&mut cx).is_pending());
        assert_eq!(backend.reads(), 0);

        block_on(backend.mutate(&Mutation::delete("todos").eq("id", 1))).unwrap();
        backend.hold_reads(false);
        let Poll::Ready(Ok(rows)) = read.as_mut().poll(&mut cx) else {
            panic!("read should be done once released");
        };
        assert_eq!(rows.as_array().map(Vec::len), Some(2));
        assert_eq!(backend.reads(), 1);
    }

    #[test]
    fn test_injected_failure_is_used_once() {
        let backend = todos();
        backend.fail_next(QueryError::new("500", "boom"));
        assert!(block_on(backend.execute(&Query::from("todos"))).is_err());
        assert!(block_on(backend.execute(&Query::from("todos"))).is_ok());
    }
}
