//! Client-side session state.
//!
//! The stored bearer token is process-wide: [`global`] hands out the shared
//! instance, [`SessionState::init`] is called after a successful login and
//! [`SessionState::teardown`] on logout or when the server answers 401.
//! Handles are cheap clones of one shared slot, so tests can build their own
//! isolated [`SessionState`] instead of touching the global one.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::login::TokenResponse;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub token: String,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClientSession {
    /// A session known only by its token, e.g. one passed on the command line.
    pub fn from_token(token: impl Into<String>) -> Self {
        ClientSession {
            token: token.into(),
            user_id: None,
            username: None,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl From<TokenResponse> for ClientSession {
    fn from(response: TokenResponse) -> Self {
        ClientSession {
            token: response.access_token,
            user_id: Some(response.user_id),
            username: Some(response.username),
            expires_at: Some(response.expires_at),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<RwLock<Option<ClientSession>>>,
}

lazy_static! {
    static ref GLOBAL_SESSION: SessionState = SessionState::default();
}

/// The process-wide session.
pub fn global() -> SessionState {
    GLOBAL_SESSION.clone()
}

impl SessionState {
    /// Store a freshly issued session, replacing any previous one.
    pub fn init(&self, session: ClientSession) {
        *self.inner.write() = Some(session);
    }

    /// Forget the stored session, returning it if there was one.
    pub fn teardown(&self) -> Option<ClientSession> {
        self.inner.write().take()
    }

    pub fn current(&self) -> Option<ClientSession> {
        self.inner.read().clone()
    }

    /// The bearer token, unless absent or known to be expired.
    pub fn token(&self) -> Option<String> {
        let now = Utc::now();
        self.inner
            .read()
            .as_ref()
            .filter(|session| !session.is_expired(now))
            .map(|session| session.token.clone())
    }

    pub fn is_active(&self) -> bool {
        self.token().is_some()
    }
}
