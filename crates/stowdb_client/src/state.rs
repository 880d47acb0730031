//! Login state machine.
//!
//! ```text
//!                 login()
//! Unauthenticated ───────▶ Authenticating ──ok──▶ Authenticated
//!       ▲                       │   │                  │
//!       │      future dropped   │   └──err──▶ Failed   │
//!       └───────────────────────┘               │      │
//!       ▲             logout()                  │      │
//!       └───────────────────────────────────────┴──────┘
//! ```
//!
//! `logout()` is accepted in every state. Called while a login is in
//! flight, it returns the handle to Unauthenticated at once and the pending
//! login resolves as [`AuthError::Cancelled`].

use crate::config::EndpointConfig;
use crate::credentials::Credentials;
use crate::error::{AuthError, AuthResult};
use crate::session::Session;
use crate::transport::{AuthTransport, LoginRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Where a [`ClientHandle`] is in its login lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session. The only state `login` accepts.
    Unauthenticated,
    /// A login request is in flight.
    Authenticating,
    /// A session is established.
    Authenticated,
    /// The last login failed. Call `logout` before trying again.
    Failed,
}

impl SessionState {
    /// Returns true if `login` may be called.
    pub fn can_login(&self) -> bool {
        matches!(self, SessionState::Unauthenticated)
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    session: Option<Session>,
    /// Bumped by every login and logout; a login only commits its result if
    /// nothing else happened since it started.
    generation: u64,
}

/// A client's login handle.
///
/// Wraps an [`EndpointConfig`] and an [`AuthTransport`]. The first call to
/// [`ClientHandle::login`] freezes the config.
pub struct ClientHandle<T: AuthTransport> {
    config: Arc<EndpointConfig>,
    transport: T,
    inner: Mutex<Inner>,
}

impl<T: AuthTransport> std::fmt::Debug for ClientHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("app_id", &self.config.app_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: AuthTransport> ClientHandle<T> {
    /// Creates an unauthenticated handle.
    pub fn new(config: Arc<EndpointConfig>, transport: T) -> Self {
        Self {
            config,
            transport,
            inner: Mutex::new(Inner {
                state: SessionState::Unauthenticated,
                session: None,
                generation: 0,
            }),
        }
    }

    /// The endpoint config.
    pub fn config(&self) -> &Arc<EndpointConfig> {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// The current session, only while Authenticated.
    pub fn session(&self) -> Option<Session> {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::Authenticated => inner.session.clone(),
            _ => None,
        }
    }

    /// Logs in with `credentials`.
    ///
    /// Sends exactly one request and never retries. Dropping the returned
    /// future before it resolves returns the handle to Unauthenticated.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidState`] unless the handle is Unauthenticated
    /// - [`AuthError::Cancelled`] if `logout` was called meanwhile
    /// - the transport's error otherwise, leaving the handle Failed
    pub async fn login(&self, credentials: &Credentials) -> AuthResult<Session> {
        let (generation, base_uri) = {
            let mut inner = self.inner.lock();
            if !inner.state.can_login() {
                return Err(AuthError::InvalidState { state: inner.state });
            }
            inner.state = SessionState::Authenticating;
            inner.generation += 1;
            (inner.generation, self.config.freeze())
        };
        let guard = PendingLogin {
            inner: &self.inner,
            generation,
            armed: true,
        };
        debug!(
            app_id = %self.config.app_id(),
            provider = credentials.provider(),
            "logging in"
        );

        let result = match LoginRequest::new(
            &base_uri,
            self.config.app_id(),
            credentials.provider(),
            credentials.payload(),
        ) {
            Ok(request) => self.transport.login(request).await,
            Err(e) => Err(e),
        };
        guard.resolve(|inner| match result {
            Ok(response) => {
                let session = Session {
                    user_id: response.user_id,
                    access_token: response.access_token,
                    refresh_token: response.refresh_token,
                    app_id: self.config.app_id().to_string(),
                    base_uri,
                    established_at: SystemTime::now(),
                };
                info!(
                    app_id = %session.app_id,
                    user_id = %session.user_id,
                    provider = credentials.provider(),
                    "logged in"
                );
                inner.state = SessionState::Authenticated;
                inner.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!(
                    app_id = %self.config.app_id(),
                    provider = credentials.provider(),
                    error = %e,
                    "login failed"
                );
                inner.state = SessionState::Failed;
                inner.session = None;
                Err(e)
            }
        })
    }

    /// Drops any session and returns to Unauthenticated. Never fails.
    pub fn logout(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = SessionState::Unauthenticated;
        inner.session = None;
        inner.generation += 1;
        if previous != SessionState::Unauthenticated {
            info!(app_id = %self.config.app_id(), from = ?previous, "logged out");
        }
    }
}

/// An in-flight login. Reverts the handle to Unauthenticated if dropped
/// before [`PendingLogin::resolve`].
struct PendingLogin<'a> {
    inner: &'a Mutex<Inner>,
    generation: u64,
    armed: bool,
}

impl PendingLogin<'_> {
    fn resolve<R>(mut self, commit: impl FnOnce(&mut Inner) -> AuthResult<R>) -> AuthResult<R> {
        self.armed = false;
        let mut inner = self.inner.lock();
        if inner.generation != self.generation || inner.state != SessionState::Authenticating {
            debug!("login superseded by logout");
            return Err(AuthError::Cancelled);
        }
        commit(&mut inner)
    }
}

impl Drop for PendingLogin<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.generation == self.generation && inner.state == SessionState::Authenticating {
            debug!("login future dropped, reverting to unauthenticated");
            inner.state = SessionState::Unauthenticated;
        }
    }
}
