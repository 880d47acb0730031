//! Error types for endpoint configuration and login.

use crate::state::SessionState;
use thiserror::Error;

/// Result type for configuration changes.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for login.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors from [`crate::EndpointConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A session built from this config has started logging in.
    #[error("endpoint configuration is frozen")]
    Frozen,

    /// The base URI is not an absolute http(s) URL.
    #[error("invalid base URI {uri:?}: {reason}")]
    InvalidUri {
        /// The rejected input.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The app id is empty.
    #[error("app id must not be empty")]
    EmptyAppId,
}

impl ConfigError {
    pub(crate) fn invalid_uri(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from [`crate::ClientHandle::login`].
#[derive(Error, Debug)]
pub enum AuthError {
    /// The request did not reach the server or the connection broke.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request timed out.
    #[error("login timed out")]
    Timeout,

    /// The server answered with an error.
    #[error("login rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
        /// Server-provided error code, if any.
        code: Option<String>,
    },

    /// The server's answer could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Login is not allowed from the handle's current state.
    #[error("cannot log in while {state:?}")]
    InvalidState {
        /// State the handle was in.
        state: SessionState,
    },

    /// The handle was logged out while the login was in flight.
    #[error("login cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AuthError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the same login may succeed when tried again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Transport { retryable, .. } => *retryable,
            AuthError::Timeout => true,
            AuthError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
