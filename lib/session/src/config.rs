//! Session configuration.
//!
//! Fields with defaults can be omitted when loading from environment
//! variables; only the service base URL is required.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for talking to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the remote service (e.g., "https://api.example.com").
    base_url: String,
    /// Key under which the session token lives in the credential store.
    /// Default: "access_token"
    #[serde(default = "default_credential_key")]
    credential_key: String,
    /// Per-request timeout in seconds.
    /// Default: 30
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
}

fn default_credential_key() -> String {
    "access_token".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl SessionConfig {
    /// Creates a configuration with defaults for optional fields.
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            credential_key: default_credential_key(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    /// Overrides the credential store key.
    #[must_use]
    pub fn with_credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    /// Returns the service base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the credential store key for the session token.
    #[must_use]
    pub fn credential_key(&self) -> &str {
        &self.credential_key
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Joins `path` onto the base URL with exactly one slash between them.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
