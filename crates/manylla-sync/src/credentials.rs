//! Persisted sync credentials.
//!
//! Holds the enabled flag, recovery phrase, sync id and installation salt.
//! The phrase is the whole of the user's identity: on disk it is sealed
//! under the [`DeviceKey`] and the file is owner-only.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use manylla_crypto::{DeviceKey, Salt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;

/// What survives a restart.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub sync_enabled: bool,
    pub recovery_phrase: Option<String>,
    pub sync_id: Option<String>,
    /// Base64 installation salt. Outlives `disable()`.
    pub salt: Option<String>,
}

impl StoredCredentials {
    /// Forget the group but keep the installation salt.
    pub fn clear_group(&mut self) {
        self.sync_enabled = false;
        self.recovery_phrase = None;
        self.sync_id = None;
    }
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("sync_enabled", &self.sync_enabled)
            .field(
                "recovery_phrase",
                &self.recovery_phrase.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sync_id", &self.sync_id)
            .field("salt", &self.salt)
            .finish()
    }
}

/// Device-local key/value storage for credentials.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<StoredCredentials, SyncError>;
    fn save(&self, credentials: &StoredCredentials) -> Result<(), SyncError>;
}

/// The installation salt, or a fresh one if none is stored yet.
///
/// A fresh salt is not written here; it is persisted together with the
/// group once enabling succeeds, so a failed enable leaves nothing behind.
pub fn installation_salt(store: &impl CredentialStore) -> Result<Salt, SyncError> {
    match store.load()?.salt {
        Some(encoded) => Ok(Salt::from_base64(&encoded)?),
        None => {
            debug!("No installation salt stored, generating one");
            Ok(Salt::generate())
        }
    }
}

/// Name of the device key file in the data directory.
pub const DEVICE_KEY_FILE: &str = "device.key";

/// The data directory's device key, created on first use.
pub fn device_key_in(data_dir: &Path) -> Result<DeviceKey, SyncError> {
    Ok(DeviceKey::load_or_generate(&data_dir.join(DEVICE_KEY_FILE))?)
}

/// On-disk layout of `credentials.json`.
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    #[serde(default)]
    sync_enabled: bool,
    /// Recovery phrase sealed under the device key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sealed_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sync_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
}

/// `credentials.json` in the data directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    key: DeviceKey,
}

impl FileCredentialStore {
    pub const FILE_NAME: &'static str = "credentials.json";

    pub const fn new(path: PathBuf, key: DeviceKey) -> Self {
        Self { path, key }
    }

    /// `credentials.json` sealed with the directory's `device.key`.
    pub fn in_dir(data_dir: &Path) -> Result<Self, SyncError> {
        Ok(Self::new(
            data_dir.join(Self::FILE_NAME),
            device_key_in(data_dir)?,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    /// Missing file = nothing stored yet.
    fn load(&self) -> Result<StoredCredentials, SyncError> {
        if !self.path.exists() {
            return Ok(StoredCredentials::default());
        }
        let data = read_private(&self.path)?;
        let file: CredentialsFile = serde_json::from_str(&data)
            .map_err(|e| SyncError::Storage(format!("Failed to parse credentials: {e}")))?;
        let recovery_phrase = file
            .sealed_phrase
            .map(|sealed| self.key.open_str(&sealed))
            .transpose()
            .map_err(|_| {
                SyncError::Storage("stored recovery phrase does not open with this device key".into())
            })?;
        Ok(StoredCredentials {
            sync_enabled: file.sync_enabled,
            recovery_phrase,
            sync_id: file.sync_id,
            salt: file.salt,
        })
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), SyncError> {
        let file = CredentialsFile {
            sync_enabled: credentials.sync_enabled,
            sealed_phrase: credentials
                .recovery_phrase
                .as_deref()
                .map(|phrase| self.key.seal_str(phrase))
                .transpose()?,
            sync_id: credentials.sync_id.clone(),
            salt: credentials.salt.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize credentials: {e}")))?;
        write_private(&self.path, json.as_bytes())
    }
}

/// Credentials kept in process memory. For hosts that own persistence
/// themselves, and for tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: StoredCredentials) -> Self {
        Self {
            inner: Mutex::new(credentials),
        }
    }

    pub fn snapshot(&self) -> StoredCredentials {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<StoredCredentials, SyncError> {
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), SyncError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = credentials.clone();
        Ok(())
    }
}

impl<T: CredentialStore> CredentialStore for std::sync::Arc<T> {
    fn load(&self) -> Result<StoredCredentials, SyncError> {
        (**self).load()
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<(), SyncError> {
        (**self).save(credentials)
    }
}

/// Write `contents` to `path`, creating parent dirs and restricting the file
/// to its owner on Unix.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Read a file written by [`write_private`], refusing it on Unix if group or
/// other can reach it.
pub(crate) fn read_private(path: &Path) -> Result<String, SyncError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(SyncError::Storage(format!(
                "{} has insecure permissions: {mode:o} (expected 600)",
                path.display()
            )));
        }
    }
    Ok(std::fs::read_to_string(path)?)
}
