//! Credential storage for the session token.
//!
//! The session manager treats the store as an opaque scoped key-value
//! map. Reads and writes are not transactional: a token can be deleted
//! between the time one caller reads it and the time it is sent, and callers
//! are expected to cope with that (the server will answer 401).

use crate::error::CredentialError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Trait for secret storage.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads the secret stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Removes `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one entry.
    #[must_use]
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.into(), value.into());
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object in a single file.
///
/// The file is created on first write and replaced atomically (write to a
/// sibling temp file, then rename). On unix the file is readable by the
/// owner only.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Creates a store using `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, CredentialError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| CredentialError::InvalidFormat {
                    reason: format!("{}: {e}", self.path.display()),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(CredentialError::StorageFailed {
                reason: format!("failed to read {}: {e}", self.path.display()),
            }),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        let storage_failed = |action: &str, e: std::io::Error| CredentialError::StorageFailed {
            reason: format!("failed to {action} {}: {e}", self.path.display()),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_failed("create parent of", e))?;
        }

        let serialized =
            serde_json::to_string_pretty(entries).map_err(|e| CredentialError::InvalidFormat {
                reason: e.to_string(),
            })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(|e| storage_failed("write", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| storage_failed("restrict permissions of", e))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_failed("replace", e))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await?;
        debug!(key, path = %self.path.display(), "stored credential");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries).await?;
        debug!(key, path = %self.path.display(), "deleted credential");
        Ok(())
    }
}
