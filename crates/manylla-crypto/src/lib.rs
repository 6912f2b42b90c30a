//! Manylla sync encryption library
//!
//! Turns a recovery phrase into a sync identity and key, and seals
//! snapshots so the blob server only ever stores ciphertext.
//!
//! ## Crypto primitives
//!
//! - **Recovery phrase**: 128 random bits, 32 lowercase hex chars
//! - **Sync id**: HKDF-SHA256 over the phrase only (stable across devices)
//! - **Sync key**: Argon2id over phrase + per-installation salt
//! - **Encryption**: XChaCha20-Poly1305 AEAD, random 24-byte nonce per seal
//! - **Share key**: independent random 32-byte key, carried in URL fragments
//! - **Device key**: random 32-byte key sealing secrets kept on local disk
//! - **Compression**: deflate before sealing, for payloads over 1 KiB

pub mod compress;
pub mod device_key;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod phrase;
pub mod share_key;

pub use device_key::DeviceKey;
pub use envelope::{
    AeadKey, EncryptedEnvelope, NONCE_SIZE, open, open_json, open_json_packed, seal, seal_json,
    seal_json_packed,
};
pub use error::CryptoError;
pub use kdf::{
    DerivedIdentity, KEY_SIZE, KdfParams, SALT_SIZE, Salt, SyncKey, derive, sync_id_for,
};
pub use phrase::RecoveryPhrase;
pub use share_key::ShareKey;
