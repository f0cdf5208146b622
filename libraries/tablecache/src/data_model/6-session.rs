//! # Session
//! Who is signed in. The holder starts from whatever session the backend already has, and after that only
//! changes in response to the backend's auth-state events: a sign-in replaces the user wholesale, a sign-out
//! clears it, and every other event is ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_model::{DirtyTracker, ListenerKey};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
            role: None,
            app_metadata: serde_json::Value::Null,
            user_metadata: serde_json::Value::Null,
            created_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix timestamp, in seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn for_user(user: User) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_at: None,
            user,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

type UserListener = Arc<dyn Fn(ListenerKey, Option<User>)>;

pub struct SessionHolder {
    user: DirtyTracker<Option<User>>,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, UserListener>,
}

impl SessionHolder {
    pub fn new(initial: Option<Session>) -> Self {
        Self {
            user: DirtyTracker::new(initial.map(|session| session.user)),
            listeners: Default::default(),
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.get().as_ref()
    }

    /// Returns true if the current user changed.
    pub fn apply(&mut self, event: AuthChangeEvent, session: Option<Session>) -> bool {
        match event {
            AuthChangeEvent::SignedIn => {
                let user = session.map(|session| session.user);
                log::info!(
                    "Signed in as {}",
                    user.as_ref().map(|u| u.id.as_str()).unwrap_or("<no user>")
                );
                self.user.replace(user, None)
            }
            AuthChangeEvent::SignedOut => {
                log::info!("Signed out");
                self.user.replace(None, None)
            }
            other => {
                log::debug!("Ignoring auth event {other:?}");
                false
            }
        }
    }

    /// The listener is invoked with the new user whenever the user changes.
    pub fn register_listener(
        &mut self,
        listener: impl Fn(ListenerKey, Option<User>) + 'static,
    ) -> ListenerKey {
        ListenerKey(self.listeners.insert(Arc::new(listener)))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key.0);
    }

    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let Some(excluded) = self.user.dirty_state.take() else {
            return Vec::new();
        };
        let user = self.user.get().clone();
        self.listeners
            .iter()
            .map(|(key, listener)| (ListenerKey(key), listener))
            .filter(|(key, _)| excluded != Some(*key))
            .map(|(key, listener)| {
                let listener = listener.clone();
                let user = user.clone();
                Box::new(move || listener(key, user)) as Box<dyn FnOnce()>
            })
            .collect()
    }
}
