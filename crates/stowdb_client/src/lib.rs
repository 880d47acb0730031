//! # StowDB Client
//!
//! Endpoint configuration and login sessions for StowDB clients.
//!
//! This crate provides:
//! - [`EndpointConfig`]: app id, base URI and timeout, mutable until the
//!   first login
//! - [`Credentials`]: anonymous, email/password and API key
//! - [`ClientHandle`]: the login state machine
//! - [`AuthTransport`]: the network seam, with a `reqwest` implementation
//!   ([`HttpTransport`]) and a scripted one for tests ([`MockTransport`])
//!
//! ## Key Invariants
//!
//! - `login` sends one request and never retries
//! - Once a login starts, the config's base URI is fixed
//! - A session is visible only while the handle is Authenticated
//! - `logout` never fails
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stowdb_client::{ClientHandle, Credentials, EndpointConfig, HttpTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(EndpointConfig::new("todo-app", "http://localhost:80")?);
//! let client = ClientHandle::new(Arc::clone(&config), HttpTransport::new(&config)?);
//! let session = client.login(&Credentials::anonymous()).await?;
//! println!("logged in as {}", session.user_id);
//! client.logout();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod credentials;
mod error;
mod http;
mod session;
mod state;
mod transport;

pub use config::{EndpointConfig, DEFAULT_TIMEOUT};
pub use credentials::Credentials;
pub use error::{AuthError, AuthResult, ConfigError, ConfigResult};
pub use http::HttpTransport;
pub use session::Session;
pub use state::{ClientHandle, SessionState};
pub use transport::{AuthTransport, LoginRequest, LoginResponse, MockTransport};
