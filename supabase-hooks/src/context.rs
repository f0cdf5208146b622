use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde_json::Value;
use tablecache::{
    CacheError, ChangeAction, ListenerKey, Row, SessionHolder, TableCache, TableRows, TableStore,
    User,
};

use crate::client::{
    AuthSubscription, BackendClient, Query, RealtimeCallback, RealtimePayload,
    RealtimeSubscription,
};
use crate::config::ProviderOptions;
use crate::error::HookError;
use crate::utils::init_logging;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<SupabaseContext>> = const { RefCell::new(Vec::new()) };
}

/// Owns the client, the signed-in user and the table cache for one application instance.
///
/// Hooks find the provider through [`SupabaseProvider::provide`]. Dropping the provider detaches it from the
/// client: the auth listener is removed and every realtime channel is closed.
///
/// ```ignore
/// let provider = SupabaseProvider::new(client);
/// let todos = provider.provide(|| use_table("todos"));
/// todos.load().await;
/// ```
pub struct SupabaseProvider {
    context: SupabaseContext,
}

/// A cheap handle onto a provider's state. This is what hooks hold on to.
#[derive(Clone)]
pub struct SupabaseContext {
    inner: Rc<ProviderInner>,
}

#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ProviderInner>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<SupabaseContext> {
        self.0.upgrade().map(|inner| SupabaseContext { inner })
    }
}

struct RealtimeChannel {
    holders: usize,
    /// The connection attempt in flight, if any.
    connecting: Option<u64>,
    /// `None` until a connection attempt succeeds.
    subscription: Option<Box<dyn RealtimeSubscription>>,
}

type PendingFetch = Shared<LocalBoxFuture<'static, Result<(), HookError>>>;

struct ProviderInner {
    client: Rc<dyn BackendClient>,
    options: ProviderOptions,

    // we should never hold a borrow across an .await or while listeners run.
    // by avoiding this, we guarantee the absence of "borrow while locked" panics
    tables: RefCell<TableStore>,
    session: RefCell<SessionHolder>,
    queries: RefCell<HashMap<String, Value>>,
    realtime: RefCell<HashMap<String, RealtimeChannel>>,
    next_attempt: Cell<u64>,
    fetches: RefCell<HashMap<String, PendingFetch>>,
    auth_subscription: RefCell<Option<Box<dyn AuthSubscription>>>,
    torn_down: Cell<bool>,
}

/// Runs pending listener notifications when dropped.
struct FlushLater<'a> {
    inner: &'a ProviderInner,
}

impl<'a> FlushLater<'a> {
    fn new(inner: &'a ProviderInner) -> Self {
        Self { inner }
    }
}

impl Drop for FlushLater<'_> {
    fn drop(&mut self) {
        self.inner.flush_notifications();
    }
}

/// Ends a realtime connection attempt. If the attempt is abandoned before it finishes, the channel is left
/// for the next caller to connect.
struct ConnectAttempt<'a> {
    inner: &'a ProviderInner,
    table: &'a str,
    attempt: u64,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if let Some(channel) = self.inner.realtime.borrow_mut().get_mut(self.table) {
            if channel.connecting == Some(self.attempt) {
                channel.connecting = None;
            }
        }
    }
}

struct PopContextOnDrop;

impl Drop for PopContextOnDrop {
    fn drop(&mut self) {
        CONTEXT_STACK.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}

impl SupabaseProvider {
    pub fn new(client: impl BackendClient + 'static) -> Self {
        Self::with_options(client, ProviderOptions::default())
    }

    pub fn with_options(client: impl BackendClient + 'static, options: ProviderOptions) -> Self {
        Self::from_shared(Rc::new(client), options)
    }

    pub fn from_shared(client: Rc<dyn BackendClient>, options: ProviderOptions) -> Self {
        init_logging();

        let initial_session = client.current_session();
        let inner = Rc::new(ProviderInner {
            session: RefCell::new(SessionHolder::new(initial_session)),
            client,
            options,
            tables: RefCell::new(TableStore::default()),
            queries: RefCell::new(HashMap::new()),
            realtime: RefCell::new(HashMap::new()),
            next_attempt: Cell::new(0),
            fetches: RefCell::new(HashMap::new()),
            auth_subscription: RefCell::new(None),
            torn_down: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        let subscription = inner
            .client
            .on_auth_state_change(Box::new(move |event, session| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let _flusher = FlushLater::new(&inner);
                inner.session.borrow_mut().apply(event, session);
            }));
        *inner.auth_subscription.borrow_mut() = Some(subscription);

        Self {
            context: SupabaseContext { inner },
        }
    }

    pub fn context(&self) -> SupabaseContext {
        self.context.clone()
    }

    /// Makes this provider the one hooks see while `f` runs. Providers nest; the innermost wins.
    pub fn provide<R>(&self, f: impl FnOnce() -> R) -> R {
        CONTEXT_STACK.with_borrow_mut(|stack| stack.push(self.context.clone()));
        let _guard = PopContextOnDrop;
        f()
    }
}

impl Drop for SupabaseProvider {
    fn drop(&mut self) {
        self.context.inner.teardown();
    }
}

/// The innermost provided context, if any.
pub fn try_use_context() -> Option<SupabaseContext> {
    CONTEXT_STACK.with_borrow(|stack| stack.last().cloned())
}

pub(crate) fn expect_context(hook: &str) -> SupabaseContext {
    try_use_context().unwrap_or_else(|| panic!("{hook} must be used within a SupabaseProvider"))
}

/// The backend client of the current provider.
pub fn use_supabase() -> Rc<dyn BackendClient> {
    expect_context("use_supabase").client()
}

/// The signed-in user of the current provider, or `None` if nobody is signed in.
pub fn use_user() -> Option<User> {
    expect_context("use_user").user()
}

impl SupabaseContext {
    pub fn client(&self) -> Rc<dyn BackendClient> {
        self.inner.client.clone()
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.inner.options
    }

    pub fn user(&self) -> Option<User> {
        self.inner.session.borrow().user().cloned()
    }

    /// A snapshot of every cached table.
    pub fn tables(&self) -> TableCache {
        self.inner.tables.borrow().snapshot()
    }

    pub fn rows(&self, table: &str) -> Option<TableRows> {
        self.inner.tables.borrow().rows(table)
    }

    pub fn is_fetched(&self, table: &str) -> bool {
        self.inner.tables.borrow().is_fetched(table)
    }

    pub fn fetched_at(&self, table: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.inner.tables.borrow().fetched_at(table)
    }

    /// Applies a change to the table cache and notifies table listeners.
    pub fn dispatch(&self, action: ChangeAction) -> Result<(), CacheError> {
        self.inner.dispatch(action)
    }

    /// The listener is invoked with the table name whenever a table's rows change.
    pub fn on_table_change(&self, listener: impl Fn(ListenerKey, String) + 'static) -> ListenerKey {
        self.inner.tables.borrow_mut().register_listener(listener)
    }

    pub fn remove_table_listener(&self, key: ListenerKey) {
        self.inner.tables.borrow_mut().unregister_listener(key)
    }

    /// The listener is invoked with the new user whenever someone signs in or out.
    pub fn on_user_change(
        &self,
        listener: impl Fn(ListenerKey, Option<User>) + 'static,
    ) -> ListenerKey {
        self.inner.session.borrow_mut().register_listener(listener)
    }

    pub fn remove_user_listener(&self, key: ListenerKey) {
        self.inner.session.borrow_mut().unregister_listener(key)
    }

    /// Tables that currently have an established realtime channel.
    pub fn realtime_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .inner
            .realtime
            .borrow()
            .iter()
            .filter(|(_, channel)| channel.subscription.is_some())
            .map(|(table, _)| table.clone())
            .collect();
        tables.sort();
        tables
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Rc::downgrade(&self.inner))
    }

    pub(crate) fn cached_query(&self, key: &str) -> Option<Value> {
        self.inner.queries.borrow().get(key).cloned()
    }

    pub(crate) fn store_query(&self, key: &str, value: Value) {
        self.inner.queries.borrow_mut().insert(key.to_string(), value);
    }

    /// Reads `table` in bulk into the cache. Concurrent calls for the same table share one read.
    pub(crate) async fn fetch_table(&self, table: &str) -> Result<(), HookError> {
        let pending = self
            .inner
            .fetches
            .borrow_mut()
            .entry(table.to_string())
            .or_insert_with(|| {
                let context = self.downgrade();
                let table = table.to_string();
                async move {
                    // the provider is gone, so there is no cache to fill
                    let Some(context) = context.upgrade() else {
                        return Ok::<(), HookError>(());
                    };
                    let outcome = context.read_table(&table).await;
                    context.inner.fetches.borrow_mut().remove(&table);
                    outcome
                }
                .boxed_local()
                .shared()
            })
            .clone();
        pending.await
    }

    async fn read_table(&self, table: &str) -> Result<(), HookError> {
        let client = self.client();
        let data = client.execute(&Query::from(table)).await?;
        let rows = Row::many_from_json(data)?;
        log::debug!("Fetched {} rows from `{table}`", rows.len());
        self.dispatch(ChangeAction::FetchAll {
            table: table.to_string(),
            rows,
        })?;
        Ok(())
    }

    /// Takes a share of the realtime channel for `table`. Each call must be paired with one
    /// [`SupabaseContext::release_realtime`]. The channel is opened by [`SupabaseContext::connect_realtime`].
    pub(crate) fn join_realtime(&self, table: &str) {
        if self.inner.torn_down.get() {
            return;
        }
        self.inner
            .realtime
            .borrow_mut()
            .entry(table.to_string())
            .or_insert_with(|| RealtimeChannel {
                holders: 0,
                connecting: None,
                subscription: None,
            })
            .holders += 1;
    }

    /// Opens the joined channel for `table`, unless it is already open or another caller is opening it.
    pub(crate) async fn connect_realtime(&self, table: &str) {
        let attempt = {
            let mut channels = self.inner.realtime.borrow_mut();
            let Some(channel) = channels.get_mut(table) else {
                return;
            };
            if channel.subscription.is_some() || channel.connecting.is_some() {
                return;
            }
            let attempt = self.inner.next_attempt.get();
            self.inner.next_attempt.set(attempt + 1);
            channel.connecting = Some(attempt);
            attempt
        };
        let _attempt = ConnectAttempt {
            inner: &self.inner,
            table,
            attempt,
        };

        let weak = Rc::downgrade(&self.inner);
        let channel_table = table.to_string();
        let callback: RealtimeCallback = Box::new(move |payload| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.apply_realtime(&channel_table, payload);
        });

        let client = self.client();
        let subscription = match client.subscribe(table, callback).await {
            Ok(subscription) => subscription,
            Err(error) => {
                log::error!("Failed to open realtime channel for `{table}`: {error}");
                return;
            }
        };

        let unclaimed = {
            let mut channels = self.inner.realtime.borrow_mut();
            match channels.get_mut(table) {
                Some(channel) if channel.connecting == Some(attempt) => {
                    channel.connecting = None;
                    channel.subscription = Some(subscription);
                    log::info!("Realtime channel open for `{table}`");
                    None
                }
                _ => Some(subscription),
            }
        };
        // Everyone let go of the table (or the provider was dropped) while we were connecting.
        if let Some(mut subscription) = unclaimed {
            subscription.unsubscribe();
        }
    }

    pub(crate) fn release_realtime(&self, table: &str) {
        let subscription = {
            let mut channels = self.inner.realtime.borrow_mut();
            let Some(channel) = channels.get_mut(table) else {
                return;
            };
            channel.holders = channel.holders.saturating_sub(1);
            if channel.holders > 0 {
                return;
            }
            channels.remove(table).and_then(|channel| channel.subscription)
        };
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
            log::info!("Realtime channel closed for `{table}`");
        }
    }
}

impl ProviderInner {
    fn dispatch(&self, action: ChangeAction) -> Result<(), CacheError> {
        let _flusher = FlushLater::new(self);
        let kind = action.kind();
        let table = action.table().to_string();
        let result = self.tables.borrow_mut().dispatch(action);
        result.inspect_err(|e| log::error!("Dropped `{kind}` on `{table}`: {e}"))
    }

    fn apply_realtime(&self, table: &str, payload: RealtimePayload) {
        match payload.into_action(table) {
            Ok(Some(action)) => {
                let _ = self.dispatch(action);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Ignoring realtime change on `{table}` with bad row: {e}"),
        }
    }

    fn flush_notifications(&self) {
        let mut notifications = self.tables.borrow_mut().drain_due_notifications();
        notifications.extend(self.session.borrow_mut().drain_due_notifications());
        for notify in notifications {
            notify();
        }
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        if let Some(mut subscription) = self.auth_subscription.borrow_mut().take() {
            subscription.unsubscribe();
        }
        self.fetches.borrow_mut().clear();
        let channels: Vec<(String, RealtimeChannel)> = self.realtime.borrow_mut().drain().collect();
        for (table, channel) in channels {
            if let Some(mut subscription) = channel.subscription {
                subscription.unsubscribe();
                log::info!("Realtime channel closed for `{table}`");
            }
        }
    }
}
