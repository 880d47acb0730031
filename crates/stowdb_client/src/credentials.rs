//! Login credentials.

use serde_json::{json, Value};
use std::fmt;

/// How a user proves who they are.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A fresh anonymous user.
    Anonymous,
    /// Email and password registered with the app.
    EmailPassword {
        /// Email address.
        email: String,
        /// Password.
        password: String,
    },
    /// A server or user API key.
    ApiKey(String),
}

impl Credentials {
    /// Anonymous credentials.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// Email/password credentials.
    pub fn email_password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::EmailPassword {
            email: email.into(),
            password: password.into(),
        }
    }

    /// API key credentials.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }

    /// Auth provider name used in the login path.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Anonymous => "anon-user",
            Self::EmailPassword { .. } => "local-userpass",
            Self::ApiKey(_) => "api-key",
        }
    }

    /// JSON body sent with the login request.
    pub fn payload(&self) -> Value {
        match self {
            Self::Anonymous => json!({}),
            Self::EmailPassword { email, password } => {
                json!({ "username": email, "password": password })
            }
            Self::ApiKey(key) => json!({ "key": key }),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::EmailPassword { email, .. } => f
                .debug_struct("EmailPassword")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Self::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}
