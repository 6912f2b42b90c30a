//! Recovery phrase: the only root of a sync group's identity.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Number of random bytes behind a phrase (128 bits).
pub const PHRASE_BYTES: usize = 16;

/// Length of the canonical hex form.
pub const PHRASE_LEN: usize = PHRASE_BYTES * 2;

/// A recovery phrase in canonical form: 32 lowercase hex characters.
///
/// The inner string is wiped on drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase(String);

impl RecoveryPhrase {
    /// Generate a new phrase from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PHRASE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let phrase = Self(hex::encode(bytes));
        bytes.zeroize();
        phrase
    }

    /// Parse user input into the canonical form.
    ///
    /// Surrounding whitespace is ignored and upper-case hex is accepted;
    /// anything else is `InvalidPhraseFormat`.
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let trimmed = input.trim();
        if !Self::is_valid_format(trimmed) {
            return Err(CryptoError::InvalidPhraseFormat);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Whether `input` (already trimmed) is 32 hex characters.
    pub fn is_valid_format(input: &str) -> bool {
        input.len() == PHRASE_LEN && input.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// The canonical hex string. Handle with care.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for RecoveryPhrase {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for RecoveryPhrase {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for RecoveryPhrase {}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveryPhrase([REDACTED])")
    }
}
