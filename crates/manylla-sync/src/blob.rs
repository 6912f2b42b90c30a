//! Remote record format.
//!
//! `<version>.<base64 salt>.<base64 envelope>`. The salt travels with the
//! ciphertext so any device holding the phrase can rebuild the group key,
//! whatever its own installation salt is.
//!
//! - `m1`: the envelope holds the snapshot JSON as is.
//! - `m2`: the JSON is framed by [`manylla_crypto::compress`] first, so
//!   large snapshots are deflated before sealing.

use manylla_crypto::{
    EncryptedEnvelope, Salt, SyncKey, open_json, open_json_packed, seal_json, seal_json_packed,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SyncError;

/// Plain JSON layout.
pub const BLOB_VERSION: &str = "m1";

/// Compression-framed layout.
pub const PACKED_BLOB_VERSION: &str = "m2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBlob {
    pub salt: Salt,
    pub envelope: EncryptedEnvelope,
    /// Whether the envelope holds a compression-framed payload (`m2`).
    pub packed: bool,
}

impl SyncBlob {
    /// Seal `value` under `key`, framing it for compression when `compress`.
    pub fn seal<T: Serialize>(
        value: &T,
        salt: Salt,
        key: &SyncKey,
        compress: bool,
    ) -> Result<Self, SyncError> {
        let envelope = if compress {
            seal_json_packed(value, key)?
        } else {
            seal_json(value, key)?
        };
        Ok(Self {
            salt,
            envelope,
            packed: compress,
        })
    }

    pub fn open<T: DeserializeOwned>(&self, key: &SyncKey) -> Result<T, SyncError> {
        if self.packed {
            Ok(open_json_packed(&self.envelope, key)?)
        } else {
            Ok(open_json(&self.envelope, key)?)
        }
    }

    const fn version(&self) -> &'static str {
        if self.packed {
            PACKED_BLOB_VERSION
        } else {
            BLOB_VERSION
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version(),
            self.salt.to_base64(),
            self.envelope.to_base64()
        )
    }

    /// Parse a stored blob.
    ///
    /// An unrecognised layout or salt is a malformed server response
    /// (`Network`). A damaged envelope is indistinguishable from a wrong key
    /// (`DecryptAuthenticationFailed`).
    pub fn decode(encoded: &str) -> Result<Self, SyncError> {
        let mut parts = encoded.trim().splitn(3, '.');
        let (Some(version), Some(salt), Some(envelope)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SyncError::Network("malformed sync blob".into()));
        };
        let packed = match version {
            BLOB_VERSION => false,
            PACKED_BLOB_VERSION => true,
            other => {
                return Err(SyncError::Network(format!(
                    "unsupported sync blob version {other:?}"
                )));
            }
        };
        let salt = Salt::from_base64(salt)
            .map_err(|_| SyncError::Network("malformed sync blob salt".into()))?;
        let envelope = EncryptedEnvelope::from_base64(envelope)?;
        Ok(Self {
            salt,
            envelope,
            packed,
        })
    }
}
