//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `TOYBOX_API_BASE_URL` - Base URL of the Toybox REST backend
//! - `TOYBOX_ACCESS_TOKEN` - Bearer access token for the API
//! - `TOYBOX_REFRESH_TOKEN` - Refresh token used for the single silent
//!   retry after a 401
//!
//! ## Optional
//! - `TOYBOX_API_TIMEOUT_SECS` - Request timeout in seconds (default: 10)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront client configuration.
///
/// Implements `Debug` manually to redact token fields.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Base URL of the REST backend (no trailing slash).
    pub base_url: Url,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Bearer access token.
    pub access_token: SecretString,
    /// Refresh token for the silent 401 retry.
    pub refresh_token: SecretString,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("base_url", &self.base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = parse_base_url(&get_required_env("TOYBOX_API_BASE_URL")?)?;
        let request_timeout = parse_timeout(
            get_env_or_default("TOYBOX_API_TIMEOUT_SECS", &DEFAULT_TIMEOUT_SECS.to_string()),
        )?;
        let access_token = get_required_secret("TOYBOX_ACCESS_TOKEN")?;
        let refresh_token = get_required_secret("TOYBOX_REFRESH_TOKEN")?;

        Ok(Self {
            base_url,
            request_timeout,
            access_token,
            refresh_token,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse and validate the API base URL. A trailing slash is trimmed so
/// paths can be appended uniformly.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| {
        ConfigError::InvalidEnvVar("TOYBOX_API_BASE_URL".to_string(), e.to_string())
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            "TOYBOX_API_BASE_URL".to_string(),
            "must have a host".to_string(),
        ));
    }
    Ok(url)
}

/// Parse the request timeout from its string form.
fn parse_timeout(raw: String) -> Result<Duration, ConfigError> {
    raw.parse::<u64>().map(Duration::from_secs).map_err(|e| {
        ConfigError::InvalidEnvVar("TOYBOX_API_TIMEOUT_SECS".to_string(), e.to_string())
    })
}
