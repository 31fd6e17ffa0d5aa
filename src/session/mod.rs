//! Server-side sessions keyed by an opaque cookie value.
//!
//! The [`Session`] handle is attached to every request by
//! [`crate::middleware::session_layer`]; controllers read and mutate it, and the
//! layer persists the result once the response has been produced.

mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

pub use store::{MemoryStore, RedisStore, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
    Warning,
    Info,
}

impl FlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
            FlashKind::Warning => "warning",
            FlashKind::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub message: String,
    pub kind: FlashKind,
}

/// Identity stored once a user has logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: i64,
    pub display_name: String,
    pub username: String,
    pub privilege_id: i64,
    pub privilege: Option<String>,
    pub fingerprint: String,
    pub last_activity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user: Option<SessionUser>,
    #[serde(default)]
    pub flash_messages: Vec<FlashMessage>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.flash_messages.is_empty()
    }
}

/// Outcome of a client check performed when the session is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCheck {
    Anonymous,
    Active,
    Expired,
    FingerprintMismatch,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    /// Id the client presented, kept until the store entry is replaced.
    previous_id: Option<String>,
    data: SessionData,
}

/// State the session layer needs to persist a session after the handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: String,
    pub previous_id: Option<String>,
    pub data: SessionData,
}

#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Session {
    pub fn new() -> Self {
        Self::from_parts(generate_session_id(), None, SessionData::default())
    }

    /// A session restored from the store under the id the client presented.
    pub fn existing(id: String, data: SessionData) -> Self {
        Self::from_parts(id.clone(), Some(id), data)
    }

    fn from_parts(id: String, previous_id: Option<String>, data: SessionData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                id,
                previous_id,
                data,
            })),
        }
    }

    pub async fn user(&self) -> Option<SessionUser> {
        self.inner.lock().await.data.user.clone()
    }

    pub async fn user_id(&self) -> Option<i64> {
        self.inner.lock().await.data.user.as_ref().map(|u| u.user_id)
    }

    pub async fn log_in(&self, user: SessionUser) {
        let mut inner = self.inner.lock().await;
        inner.id = generate_session_id();
        inner.data.user = Some(user);
    }

    pub async fn log_out(&self) {
        let mut inner = self.inner.lock().await;
        inner.id = generate_session_id();
        inner.data.user = None;
    }

    pub async fn flash(&self, kind: FlashKind, message: impl Into<String>) {
        self.inner.lock().await.data.flash_messages.push(FlashMessage {
            message: message.into(),
            kind,
        });
    }

    /// Returns the queued flash messages and clears the queue.
    pub async fn take_flash(&self) -> Vec<FlashMessage> {
        std::mem::take(&mut self.inner.lock().await.data.flash_messages)
    }

    /// Verifies the logged-in user still talks from the same client and has not
    /// been idle too long; refreshes the activity timestamp otherwise.
    pub async fn check_client(&self, fingerprint: &str, idle_timeout_secs: i64, now: i64) -> ClientCheck {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let verdict = match inner.data.user.as_mut() {
            None => return ClientCheck::Anonymous,
            Some(user) if user.fingerprint != fingerprint => ClientCheck::FingerprintMismatch,
            Some(user) if now - user.last_activity > idle_timeout_secs => ClientCheck::Expired,
            Some(user) => {
                user.last_activity = now;
                return ClientCheck::Active;
            }
        };

        inner.data.user = None;
        inner.id = generate_session_id();
        verdict
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            id: inner.id.clone(),
            previous_id: inner.previous_id.clone(),
            data: inner.data.clone(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
