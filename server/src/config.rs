//! Server configuration module.
//!
//! Parses configuration from environment variables for the Syncwave server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SYNCWAVE_WEBHOOK_SECRET` | No* | - | Shared secret for webhook HMAC signatures |
//! | `SYNCWAVE_AUTH_URL` | No | `http://localhost:8000/api` | Base URL of the auth authority |
//! | `SYNCWAVE_AUTH_TIMEOUT_SECS` | No | 5 | Authority request timeout in seconds |
//! | `SYNCWAVE_CORS_ORIGINS` | No | `*` | Comma-separated allowed origins, or `*` |
//! | `PORT` | No | 3001 | HTTP server port |
//!
//! *The server starts without a secret but every signed endpoint responds
//! with a 500 until one is configured. A startup warning makes the state
//! visible.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3001;

/// Default base URL of the authentication authority.
const DEFAULT_AUTH_URL: &str = "http://localhost:8000/api";

/// Default authority request timeout in seconds.
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 5;

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret for webhook signature verification. `None` means the
    /// server cannot authenticate any webhook.
    pub webhook_secret: Option<String>,

    /// Base URL of the authentication authority, without trailing slash.
    pub auth_url: String,

    /// Timeout for authority requests.
    pub auth_timeout: Duration,

    /// Allowed CORS origins: `*` or a comma-separated list.
    pub cors_origins: String,

    /// HTTP server port.
    pub port: u16,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `PORT` or `SYNCWAVE_AUTH_TIMEOUT_SECS` is
    /// set but not a valid number.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use syncwave_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_secret = non_empty_env("SYNCWAVE_WEBHOOK_SECRET");
        let auth_url = non_empty_env("SYNCWAVE_AUTH_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string());
        let auth_timeout = Duration::from_secs(parse_u64_env(
            "SYNCWAVE_AUTH_TIMEOUT_SECS",
            DEFAULT_AUTH_TIMEOUT_SECS,
        )?);
        let cors_origins = non_empty_env("SYNCWAVE_CORS_ORIGINS").unwrap_or_else(|| "*".to_string());
        let port = parse_port()?;

        let config = Self {
            webhook_secret,
            auth_url,
            auth_timeout,
            cors_origins,
            port,
        };

        if config.webhook_secret.is_none() {
            warn!(
                "SYNCWAVE_WEBHOOK_SECRET is not set - webhook endpoints will reject \
                 all requests until a secret is configured"
            );
        }

        Ok(config)
    }
}

/// Reads an environment variable, treating unset and empty identically.
fn non_empty_env(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Parses a numeric environment variable with a default.
fn parse_u64_env(name: &str, default: u64) -> Result<u64, ConfigError> {
    match non_empty_env(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, format!("'{value}' is not a valid number"))),
        None => Ok(default),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match non_empty_env("PORT") {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid("PORT", format!("'{value}' is not a valid port"))),
        None => Ok(DEFAULT_PORT),
    }
}
