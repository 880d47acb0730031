//! HTTP transport implementation.
//!
//! Posts the credential payload as JSON with `reqwest` and maps the
//! response onto [`LoginResponse`] or a typed [`AuthError`].

use crate::config::EndpointConfig;
use crate::error::{AuthError, AuthResult};
use crate::transport::{AuthTransport, ErrorBody, LoginRequest, LoginResponse};
use std::future::Future;
use tracing::debug;

const USER_AGENT: &str = concat!("stowdb/", env!("CARGO_PKG_VERSION"));

/// Login over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport using the config's request timeout.
    ///
    /// # Errors
    ///
    /// Returns a fatal transport error if the HTTP client cannot be built.
    pub fn new(config: &EndpointConfig) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| AuthError::transport_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, request: LoginRequest) -> AuthResult<LoginResponse> {
        debug!(url = %request.url, "sending login request");
        let response = self
            .client
            .post(request.url)
            .json(&request.body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<LoginResponse>()
                .await
                .map_err(|e| AuthError::Protocol(format!("malformed login response: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        let (message, code) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error, body.error_code),
            Err(_) => (
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
                None,
            ),
        };
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message,
            code,
        })
    }
}

impl AuthTransport for HttpTransport {
    fn login(
        &self,
        request: LoginRequest,
    ) -> impl Future<Output = AuthResult<LoginResponse>> + Send {
        self.post(request)
    }
}

fn map_send_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else if e.is_builder() {
        AuthError::transport_fatal(e.to_string())
    } else {
        AuthError::transport_retryable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let config = EndpointConfig::new("app", "http://localhost").unwrap();
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn user_agent_names_crate() {
        assert!(USER_AGENT.starts_with("stowdb/"));
    }
}
