//! Endpoint configuration.

use crate::error::{ConfigError, ConfigResult};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how a client reaches its auth service.
///
/// The base URI can be changed until a [`crate::ClientHandle`] built from
/// this config starts its first login. From then on the config is frozen and
/// [`EndpointConfig::set_base_uri`] fails with [`ConfigError::Frozen`].
#[derive(Debug)]
pub struct EndpointConfig {
    app_id: String,
    timeout: Duration,
    endpoint: Mutex<Endpoint>,
}

#[derive(Debug)]
struct Endpoint {
    base_uri: Url,
    frozen: bool,
}

impl EndpointConfig {
    /// Creates a config for `app_id` served from `base_uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if `app_id` is empty or `base_uri` is not an
    /// absolute http(s) URL.
    pub fn new(app_id: impl Into<String>, base_uri: &str) -> ConfigResult<Self> {
        let app_id = app_id.into();
        if app_id.is_empty() {
            return Err(ConfigError::EmptyAppId);
        }
        Ok(Self {
            app_id,
            timeout: DEFAULT_TIMEOUT,
            endpoint: Mutex::new(Endpoint {
                base_uri: parse_base_uri(base_uri)?,
                frozen: false,
            }),
        })
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The app id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The current base URI.
    pub fn base_uri(&self) -> Url {
        self.endpoint.lock().base_uri.clone()
    }

    /// Returns true once a login has started with this config.
    pub fn is_frozen(&self) -> bool {
        self.endpoint.lock().frozen
    }

    /// Points the config at a different server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Frozen`] once a login has started, or
    /// [`ConfigError::InvalidUri`] if `uri` is not an absolute http(s) URL.
    /// The config is unchanged on error.
    pub fn set_base_uri(&self, uri: &str) -> ConfigResult<()> {
        let mut endpoint = self.endpoint.lock();
        if endpoint.frozen {
            return Err(ConfigError::Frozen);
        }
        endpoint.base_uri = parse_base_uri(uri)?;
        debug!(app_id = %self.app_id, base_uri = %endpoint.base_uri, "base URI changed");
        Ok(())
    }

    /// Freezes the config and returns the base URI the login will use.
    pub(crate) fn freeze(&self) -> Url {
        let mut endpoint = self.endpoint.lock();
        endpoint.frozen = true;
        endpoint.base_uri.clone()
    }
}

fn parse_base_uri(uri: &str) -> ConfigResult<Url> {
    let url = Url::parse(uri).map_err(|e| ConfigError::invalid_uri(uri, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid_uri(uri, "scheme must be http or https"));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(ConfigError::invalid_uri(uri, "missing host"));
    }
    Ok(url)
}
