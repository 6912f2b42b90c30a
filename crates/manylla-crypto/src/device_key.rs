//! Per-device key for secrets kept on local disk.
//!
//! Generated once per installation and never leaves the device. It keeps
//! the recovery phrase out of plain view in credential and invite files;
//! anyone who can read the key file as well gets the phrase back.

use std::fmt;
use std::io::Read;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::{EncryptedEnvelope, open, seal};
use crate::error::CryptoError;
use crate::kdf::KEY_SIZE;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; KEY_SIZE]);

impl DeviceKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        let key = Self(bytes);
        bytes.zeroize();
        key
    }

    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Write the raw key to `path`, owner-only on Unix.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.0)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Read a key written by [`save_to_file`](Self::save_to_file).
    ///
    /// On Unix the file must be 0600; anything looser is refused.
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Device key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let mut file = std::fs::File::open(path)?;
        let mut buf = [0u8; KEY_SIZE];
        file.read_exact(&mut buf)?;
        let key = Self(buf);
        buf.zeroize();
        Ok(key)
    }

    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let key = Self::generate();
            key.save_to_file(path)?;
            Ok(key)
        }
    }

    /// Seal a short secret; returns base64 of the envelope.
    pub fn seal_str(&self, secret: &str) -> Result<String, CryptoError> {
        Ok(seal(secret.as_bytes(), self)?.to_base64())
    }

    pub fn open_str(&self, sealed: &str) -> Result<String, CryptoError> {
        let envelope = EncryptedEnvelope::from_base64(sealed)?;
        let mut plaintext = open(&envelope, self)?;
        let result = String::from_utf8(plaintext.clone())
            .map_err(|_| CryptoError::SerializationError("sealed secret is not UTF-8".into()));
        plaintext.zeroize();
        result
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey([REDACTED])")
    }
}
