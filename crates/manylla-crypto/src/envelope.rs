//! Authenticated encryption envelope.
//!
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per call. The
//! extended nonce makes random generation safe for the lifetime of a key,
//! so there is no counter to persist.
//!
//! Transport encoding: base64(`nonce(24) || ciphertext || tag(16)`).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::compress;
use crate::device_key::DeviceKey;
use crate::error::CryptoError;
use crate::kdf::{KEY_SIZE, SyncKey};
use crate::share_key::ShareKey;

/// Nonce size for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Anything that can key the envelope cipher.
pub trait AeadKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE];
}

impl AeadKey for SyncKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        self.as_bytes()
    }
}

impl AeadKey for ShareKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        self.as_bytes()
    }
}

impl AeadKey for DeviceKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        self.as_bytes()
    }
}

/// Nonce plus ciphertext (ciphertext includes the 16-byte tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split `nonce || ciphertext`. Anything too short to hold a nonce and a
    /// tag is reported as an authentication failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Self::from_bytes(&bytes)
    }
}

fn cipher_for(key: &impl AeadKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(key.key_bytes()))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(plaintext: &[u8], key: &impl AeadKey) -> Result<EncryptedEnvelope, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher_for(key)
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedEnvelope { nonce, ciphertext })
}

/// Decrypt and authenticate. Never returns unauthenticated bytes.
pub fn open(envelope: &EncryptedEnvelope, key: &impl AeadKey) -> Result<Vec<u8>, CryptoError> {
    cipher_for(key)
        .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Serialize `value` as JSON and seal it.
pub fn seal_json<T: Serialize>(
    value: &T,
    key: &impl AeadKey,
) -> Result<EncryptedEnvelope, CryptoError> {
    let json =
        serde_json::to_vec(value).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    seal(&json, key)
}

/// Open an envelope and parse its JSON plaintext.
pub fn open_json<T: DeserializeOwned>(
    envelope: &EncryptedEnvelope,
    key: &impl AeadKey,
) -> Result<T, CryptoError> {
    let plaintext = open(envelope, key)?;
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::SerializationError(e.to_string()))
}

/// [`seal_json`] with the JSON framed by [`compress::pack`].
pub fn seal_json_packed<T: Serialize>(
    value: &T,
    key: &impl AeadKey,
) -> Result<EncryptedEnvelope, CryptoError> {
    let json =
        serde_json::to_vec(value).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    seal(&compress::pack(&json)?, key)
}

pub fn open_json_packed<T: DeserializeOwned>(
    envelope: &EncryptedEnvelope,
    key: &impl AeadKey,
) -> Result<T, CryptoError> {
    let json = compress::unpack(&open(envelope, key)?)?;
    serde_json::from_slice(&json).map_err(|e| CryptoError::SerializationError(e.to_string()))
}
