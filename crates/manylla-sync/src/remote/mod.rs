//! Blob server access.
//!
//! The server is untrusted storage: it sees sync ids, share tokens and
//! ciphertext, never phrases or keys.

mod http;
#[cfg(any(test, feature = "test-utils"))]
mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::share::RecipientType;

pub use http::{HttpRemote, RemoteConfig};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryRemote;

/// Blob server errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Server error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// A stored sync record as returned by `GET /sync/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlob {
    pub encrypted_blob: String,
    /// Server-side write time (unix milliseconds). Informational only.
    #[serde(default)]
    pub timestamp: i64,
}

/// Body of `POST /share`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub access_code: String,
    pub encrypted_data: String,
    pub recipient_type: RecipientType,
    pub expiry_hours: u32,
}

/// Opaque storage of sync blobs keyed by sync id.
pub trait RemoteStore: Send + Sync + 'static {
    /// Overwrite the blob for `sync_id` (last write wins).
    fn put_blob(
        &self,
        sync_id: &str,
        encrypted_blob: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// `Ok(None)` when nothing is stored under `sync_id`.
    fn fetch_blob(
        &self,
        sync_id: &str,
    ) -> impl Future<Output = Result<Option<RemoteBlob>, RemoteError>> + Send;
}

/// Storage of encrypted share payloads keyed by access token.
pub trait ShareStore: Send + Sync + 'static {
    fn create_share(
        &self,
        request: &ShareRequest,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
