//! Errors from loading settings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A settings file is missing, unreadable or does not fit `Config`.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Defaults could not be turned into JSON for layering.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
