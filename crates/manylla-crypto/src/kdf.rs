//! Key derivation from a recovery phrase.
//!
//! Two independent derivations:
//! - the sync id uses HKDF-SHA256 over the phrase alone, so every device
//!   that knows the phrase lands in the same sync group;
//! - the sync key uses Argon2id over the phrase and a salt. This is the
//!   one deliberately slow, memory-hard step in the subsystem.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::phrase::RecoveryPhrase;

/// HKDF salt for sync id derivation (domain separation, not secret).
const SYNC_ID_HKDF_SALT: &[u8] = b"manylla-sync-id-v1";

/// HKDF info string for sync id derivation.
const SYNC_ID_HKDF_INFO: &[u8] = b"sync-id";

/// Bytes of HKDF output kept for the sync id (hex-encoded to 32 chars).
const SYNC_ID_BYTES: usize = 16;

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Sync key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Per-installation random salt mixed into the sync key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generate a new random salt.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidSalt(e.to_string()))?;
        let arr: [u8; SALT_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidSalt(format!(
                "expected {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}

/// A 32-byte symmetric key. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey([u8; KEY_SIZE]);

impl SyncKey {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Reconstruct from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Raw key bytes. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SyncKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SyncKey {}

impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncKey([REDACTED])")
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456, // 19 MiB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters so unit tests do not spend seconds in Argon2.
    #[cfg(any(test, feature = "test-utils"))]
    pub const fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject parameters Argon2 cannot run with.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.parallelism < 1 {
            return Err(CryptoError::KeyDerivationFailed(
                "parallelism must be at least 1".into(),
            ));
        }
        if self.iterations < 1 {
            return Err(CryptoError::KeyDerivationFailed(
                "iterations must be at least 1".into(),
            ));
        }
        if self.memory_kib < 8 * self.parallelism {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "memory must be at least {} KiB for {} lanes",
                8 * self.parallelism,
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// The result of deriving from a phrase: public id plus secret key.
#[derive(Debug, Clone)]
pub struct DerivedIdentity {
    /// Remote lookup key, 32 lowercase hex chars.
    pub sync_id: String,
    pub key: SyncKey,
}

/// Compute the sync id for a phrase. Pure and salt-independent.
pub fn sync_id_for(phrase: &RecoveryPhrase) -> Result<String, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(SYNC_ID_HKDF_SALT), phrase.as_bytes());
    let mut out = [0u8; SYNC_ID_BYTES];
    hk.expand(SYNC_ID_HKDF_INFO, &mut out)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(hex::encode(out))
}

fn derive_key(
    phrase: &RecoveryPhrase,
    salt: &Salt,
    params: &KdfParams,
) -> Result<SyncKey, CryptoError> {
    params.validate()?;
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivationFailed(format!("invalid parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(phrase.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let key = SyncKey(out);
    out.zeroize();
    Ok(key)
}

/// Derive `{sync_id, key}` from a phrase and salt.
///
/// CPU- and memory-heavy; async callers should run it on a blocking pool.
pub fn derive(
    phrase: &RecoveryPhrase,
    salt: &Salt,
    params: &KdfParams,
) -> Result<DerivedIdentity, CryptoError> {
    Ok(DerivedIdentity {
        sync_id: sync_id_for(phrase)?,
        key: derive_key(phrase, salt, params)?,
    })
}
