//! Login command implementation.

use clap::Args;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use stowdb_client::{ClientHandle, Credentials, EndpointConfig, HttpTransport, Session};

/// Arguments for the login command.
#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// App id
    #[arg(long)]
    pub app_id: String,

    /// Base URI of the auth service
    #[arg(long)]
    pub base_uri: String,

    /// Email for email/password login
    #[arg(long, requires = "password", conflicts_with = "api_key")]
    pub email: Option<String>,

    /// Password for email/password login
    #[arg(long, requires = "email")]
    pub password: Option<String>,

    /// API key login
    #[arg(long)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl LoginArgs {
    /// Credentials selected by the flags; anonymous when none are given.
    pub fn credentials(&self) -> Credentials {
        match (&self.api_key, &self.email, &self.password) {
            (Some(key), _, _) => Credentials::api_key(key.clone()),
            (None, Some(email), Some(password)) => {
                Credentials::email_password(email.clone(), password.clone())
            }
            _ => Credentials::anonymous(),
        }
    }
}

/// Runs the login command.
pub fn run(args: &LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(
        EndpointConfig::new(args.app_id.clone(), &args.base_uri)?
            .with_timeout(Duration::from_secs(args.timeout_secs)),
    );
    let transport = HttpTransport::new(&config)?;
    let client = ClientHandle::new(Arc::clone(&config), transport);
    let credentials = args.credentials();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let session = runtime.block_on(client.login(&credentials))?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&session_json(&session))?),
        _ => print_text_output(&session),
    }

    client.logout();
    Ok(())
}

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "user_id": session.user_id,
        "app_id": session.app_id,
        "base_uri": session.base_uri.as_str(),
        "has_refresh_token": session.refresh_token.is_some(),
        "established_at": session
            .established_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    })
}

fn print_text_output(session: &Session) {
    println!("✓ Logged in");
    println!("  User:     {}", session.user_id);
    println!("  App:      {}", session.app_id);
    println!("  Server:   {}", session.base_uri);
    println!(
        "  Refresh:  {}",
        if session.refresh_token.is_some() {
            "issued"
        } else {
            "none"
        }
    );
}
