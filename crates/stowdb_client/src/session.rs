//! Authenticated sessions.

use std::fmt;
use std::time::SystemTime;
use url::Url;

/// The result of a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-assigned user id.
    pub user_id: String,
    /// Bearer token for requests.
    pub access_token: String,
    /// Token for renewing the access token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// App the session belongs to.
    pub app_id: String,
    /// Server the session was established with.
    pub base_uri: Url,
    /// When the login completed.
    pub established_at: SystemTime,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("app_id", &self.app_id)
            .field("base_uri", &self.base_uri.as_str())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}
