//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Recovery phrase must be 32 hexadecimal characters")]
    InvalidPhraseFormat,

    /// Wrong key, tampered ciphertext or a truncated envelope. Deliberately
    /// carries no detail.
    #[error("Decryption failed: authentication failed")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid salt: {0}")]
    InvalidSalt(String),

    #[error("Compression error: {0}")]
    CompressionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
