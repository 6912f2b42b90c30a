//! Sync error taxonomy.

use manylla_crypto::CryptoError;
use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by the sync session, invite store and share builder.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Input is neither a 32-hex phrase nor a usable invite code.
    #[error("Recovery phrase must be 32 hexadecimal characters")]
    InvalidPhraseFormat,

    #[error("Invite code is invalid or has expired")]
    InvalidOrExpiredInvite,

    /// Wrong phrase or tampered blob. Carries no detail on purpose.
    #[error("Could not decrypt sync data: wrong recovery phrase or corrupted data")]
    DecryptAuthenticationFailed,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("A sync operation is already in progress")]
    SyncBusy,

    #[error("Sync is not enabled")]
    NotEnabled,

    #[error("Sync is already enabled")]
    AlreadyEnabled,

    /// No blob exists for the sync id being joined.
    #[error("No sync group found for this recovery phrase")]
    GroupNotFound,

    /// Sync was disabled while the operation was in flight; its result was
    /// discarded.
    #[error("Sync was disabled before the operation finished")]
    Cancelled,

    #[error("Expiration must be between 1 and {max} days, got {requested}")]
    InvalidExpiration { requested: u32, max: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),
}

/// Field-free mirror of [`SyncError`], carried by `SyncStatus::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    InvalidPhraseFormat,
    InvalidOrExpiredInvite,
    DecryptAuthenticationFailed,
    Network,
    Timeout,
    SyncBusy,
    NotEnabled,
    AlreadyEnabled,
    GroupNotFound,
    Cancelled,
    InvalidExpiration,
    Storage,
    Crypto,
}

impl SyncError {
    pub const fn kind(&self) -> SyncErrorKind {
        match self {
            Self::InvalidPhraseFormat => SyncErrorKind::InvalidPhraseFormat,
            Self::InvalidOrExpiredInvite => SyncErrorKind::InvalidOrExpiredInvite,
            Self::DecryptAuthenticationFailed => SyncErrorKind::DecryptAuthenticationFailed,
            Self::Network(_) => SyncErrorKind::Network,
            Self::Timeout => SyncErrorKind::Timeout,
            Self::SyncBusy => SyncErrorKind::SyncBusy,
            Self::NotEnabled => SyncErrorKind::NotEnabled,
            Self::AlreadyEnabled => SyncErrorKind::AlreadyEnabled,
            Self::GroupNotFound => SyncErrorKind::GroupNotFound,
            Self::Cancelled => SyncErrorKind::Cancelled,
            Self::InvalidExpiration { .. } => SyncErrorKind::InvalidExpiration,
            Self::Storage(_) => SyncErrorKind::Storage,
            Self::Crypto(_) => SyncErrorKind::Crypto,
        }
    }

    /// Whether the user can fix this by correcting what they typed.
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPhraseFormat
                | Self::InvalidOrExpiredInvite
                | Self::InvalidExpiration { .. }
        )
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidPhraseFormat => Self::InvalidPhraseFormat,
            CryptoError::AuthenticationFailed => Self::DecryptAuthenticationFailed,
            CryptoError::Io(e) => Self::Storage(e.to_string()),
            other => Self::Crypto(other),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Timeout => Self::Timeout,
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidPhraseFormat => "invalid_phrase_format",
            Self::InvalidOrExpiredInvite => "invalid_or_expired_invite",
            Self::DecryptAuthenticationFailed => "decrypt_authentication_failed",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::SyncBusy => "sync_busy",
            Self::NotEnabled => "not_enabled",
            Self::AlreadyEnabled => "already_enabled",
            Self::GroupNotFound => "group_not_found",
            Self::Cancelled => "cancelled",
            Self::InvalidExpiration => "invalid_expiration",
            Self::Storage => "storage",
            Self::Crypto => "crypto",
        };
        f.write_str(name)
    }
}
