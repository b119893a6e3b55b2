//! Polling configuration.

use lily_core::IdentityId;
use serde::Deserialize;
use std::time::Duration;

/// The external identity whose conversation the client follows by default.
pub const DEFAULT_IDENTITY: &str = "00000000-0000-0000-0000-000000000001";

/// Default interval shared by the locator and the synchronizer.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Configuration for conversation discovery and synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Identity whose latest conversation is followed.
    #[serde(default = "default_identity")]
    pub identity: IdentityId,
    /// Poll interval in milliseconds, for both pollers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_identity() -> IdentityId {
    IdentityId::from(DEFAULT_IDENTITY)
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SyncConfig {
    /// Follows a different identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<IdentityId>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Overrides the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
