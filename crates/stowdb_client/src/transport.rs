//! Transport layer abstraction for login.

use crate::error::{AuthError, AuthResult};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// One login call.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
    /// Full login URL.
    pub url: Url,
    /// JSON credential payload.
    pub body: Value,
}

impl LoginRequest {
    /// Builds the request for `provider` under `base_uri`:
    /// `{base_uri}/api/client/v1/apps/{app_id}/auth/{provider}/login`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `base_uri` cannot carry a path.
    pub fn new(base_uri: &Url, app_id: &str, provider: &str, body: Value) -> AuthResult<Self> {
        let mut url = base_uri.clone();
        url.path_segments_mut()
            .map_err(|()| AuthError::Protocol(format!("{base_uri} cannot be a base URL")))?
            .pop_if_empty()
            .extend(["api", "client", "v1", "apps", app_id, "auth", provider, "login"]);
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { url, body })
    }
}

/// Body of a successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    /// Server-assigned user id.
    pub user_id: String,
    /// Bearer token.
    pub access_token: String,
    /// Refresh token, if issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Body of an error response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
    #[serde(default)]
    pub(crate) error_code: Option<String>,
}

/// Sends login requests to the auth service.
///
/// Implementations issue exactly one request per call and never retry.
pub trait AuthTransport: Send + Sync {
    /// Performs the login call.
    fn login(&self, request: LoginRequest)
        -> impl Future<Output = AuthResult<LoginResponse>> + Send;
}

/// A scripted transport for testing.
///
/// Replies are handed out in order; once they run out every call fails with
/// a protocol error.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<AuthResult<LoginResponse>>>,
    requests: Mutex<Vec<LoginRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    /// Creates a mock with no replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a successful reply.
    pub fn push_success(&self, user_id: &str, access_token: &str) {
        self.replies.lock().push_back(Ok(LoginResponse {
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
        }));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: AuthError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LoginRequest> {
        self.requests.lock().clone()
    }
}

impl AuthTransport for MockTransport {
    fn login(
        &self,
        request: LoginRequest,
    ) -> impl Future<Output = AuthResult<LoginResponse>> + Send {
        self.requests.lock().push(request);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Protocol("no mock reply queued".into())));
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            reply
        }
    }
}
