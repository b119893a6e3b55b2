//! Centralized client configuration.
//!
//! Loaded via the `config` crate from environment variables, nested with
//! `__` (`SESSION__BASE_URL`, `SYNC__POLL_INTERVAL_MS`). Everything except the
//! service base URL has a default.

use lily_convo::SyncConfig;
use lily_session::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Remote service and token storage settings.
    pub session: SessionConfig,

    /// Conversation identity and polling settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// File holding the session token between runs.
    #[serde(default = "default_credential_path")]
    pub credential_path: PathBuf,

    /// Email to sign in with when no stored session is valid.
    #[serde(default)]
    pub sign_in_email: Option<String>,
}

fn default_credential_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
