//! Invite codes for pairing a second device.
//!
//! An invite is a short `XXXX-XXXX` code drawn from an alphabet without
//! look-alike symbols (no `0/O`, `1/I/L`). The code maps, through the local
//! [`InviteCodeStore`], to the sync id and recovery phrase of the group; the
//! shareable URL additionally carries the phrase in its fragment so the
//! joining device never needs the table at all.

mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use manylla_crypto::RecoveryPhrase;
use rand::Rng;
use rand::rngs::OsRng;
use regex::Regex;

pub use store::{InviteCodeStore, InviteEntry, InviteGrant};

/// Symbols an invite code may contain.
pub const INVITE_ALPHABET: &str = "ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// How long a stored invite stays valid.
pub const INVITE_TTL_MS: i64 = manylla_core::time::DAY_MS;

/// Symbols on each side of the dash.
const GROUP_LEN: usize = 4;

/// Canonical code shape (applied after trim + uppercase).
#[allow(clippy::expect_used)]
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-HJKMNP-Z2-9]{4}-[A-HJKMNP-Z2-9]{4}$").expect("static regex is valid")
});

/// Code in the `/sync/<code>` path segment of an invite URL.
#[allow(clippy::expect_used)]
static URL_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/sync/([A-HJKMNP-Z2-9]{4}-[A-HJKMNP-Z2-9]{4})(?:[/?]|$)")
        .expect("static regex is valid")
});

/// A well-formed invite code in canonical upper-case `XXXX-XXXX` form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InviteCode(String);

impl InviteCode {
    /// Draw a fresh code from `OsRng`.
    pub fn generate() -> Self {
        let alphabet = INVITE_ALPHABET.as_bytes();
        let mut rng = OsRng;
        let mut code = String::with_capacity(GROUP_LEN * 2 + 1);
        for i in 0..GROUP_LEN * 2 {
            if i == GROUP_LEN {
                code.push('-');
            }
            code.push(char::from(alphabet[rng.gen_range(0..alphabet.len())]));
        }
        Self(code)
    }

    /// Normalize and validate user input. `None` if the shape is wrong.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = normalize(input);
        CODE_RE.is_match(&normalized).then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InviteCode").field(&self.0).finish()
    }
}

impl FromStr for InviteCode {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(crate::error::SyncError::InvalidOrExpiredInvite)
    }
}

/// Trim, uppercase and strip all interior whitespace.
pub fn normalize(code: &str) -> String {
    code.trim()
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Whether `code` has the `XXXX-XXXX` shape after trim + uppercase.
///
/// Interior whitespace is not forgiven here; use [`InviteCode::parse`] to
/// accept `"abcd - 2345"` style input.
pub fn validate_format(code: &str) -> bool {
    CODE_RE.is_match(&code.trim().to_uppercase())
}

/// Render a code as `ABCD - 2345` for reading aloud. Input that does not
/// look like a code is returned normalized.
pub fn format_for_display(code: &str) -> String {
    let normalized = normalize(code);
    match normalized.split_once('-') {
        Some((head, tail)) if head.len() == GROUP_LEN => format!("{head} - {tail}"),
        _ => normalized,
    }
}

/// `{base_url}/sync/{code}#{phrase}`.
pub fn generate_invite_url(code: &InviteCode, phrase: &RecoveryPhrase, base_url: &str) -> String {
    format!(
        "{}/sync/{}#{}",
        base_url.trim_end_matches('/'),
        code,
        phrase.as_str()
    )
}

/// What could be recovered from an invite URL. Either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteLink {
    pub code: Option<InviteCode>,
    pub phrase: Option<RecoveryPhrase>,
}

impl InviteLink {
    /// Split a full URL into path and fragment, then [`parse_invite_url`].
    pub fn from_url(url: &str) -> Self {
        let (before_fragment, fragment) = match url.split_once('#') {
            Some((head, frag)) => (head, Some(frag)),
            None => (url, None),
        };
        let path = before_fragment
            .split_once("://")
            .map_or(before_fragment, |(_, rest)| {
                rest.find('/').map_or("", |idx| &rest[idx..])
            });
        parse_invite_url(path, fragment.unwrap_or_default())
    }

    /// The phrase if the link carried one, else the code for a table lookup.
    pub fn join_input(&self) -> Option<String> {
        self.phrase
            .as_ref()
            .map(|p| p.as_str().to_string())
            .or_else(|| self.code.as_ref().map(ToString::to_string))
    }
}

/// Parse the path and fragment of an invite URL.
///
/// Malformed parts come back as `None`; this never fails.
pub fn parse_invite_url(pathname: &str, fragment: &str) -> InviteLink {
    let code = URL_PATH_RE
        .captures(pathname)
        .and_then(|caps| caps.get(1))
        .and_then(|m| InviteCode::parse(m.as_str()));
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let phrase = RecoveryPhrase::parse(fragment).ok();
    InviteLink { code, phrase }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PHRASE: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn generated_codes_are_well_formed() {
        for _ in 0..500 {
            let code = InviteCode::generate();
            assert!(validate_format(code.as_str()), "bad code {code}");
            assert_eq!(code.as_str().len(), 9);
            assert!(
                code.as_str()
                    .chars()
                    .all(|c| c == '-' || INVITE_ALPHABET.contains(c))
            );
        }
    }

    #[test]
    fn alphabet_has_no_lookalikes() {
        assert_eq!(INVITE_ALPHABET.len(), 31);
        for c in ['0', '1', 'I', 'L', 'O'] {
            assert!(!INVITE_ALPHABET.contains(c));
        }
    }

    #[test]
    fn validate_accepts_lowercase_and_padding() {
        assert!(validate_format("ABCD-2345"));
        assert!(validate_format("  abcd-2345 "));
    }

    #[test]
    fn validate_rejects_confusable_and_malformed() {
        assert!(!validate_format("ABCD-1234"));
        assert!(!validate_format("ABCO-2345"));
        assert!(!validate_format("ABCD2345"));
        assert!(!validate_format("ABC-23456"));
        assert!(!validate_format("ABCD-2345-"));
        assert!(!validate_format(""));
    }

    #[test]
    fn normalize_strips_whitespace() {
        assert_eq!(normalize(" abcd - 2345\n"), "ABCD-2345");
        assert_eq!(
            InviteCode::parse("abcd - 2345").unwrap().as_str(),
            "ABCD-2345"
        );
    }

    #[test]
    fn display_format_adds_spacing() {
        assert_eq!(format_for_display("abcd-2345"), "ABCD - 2345");
        assert_eq!(format_for_display("nonsense"), "NONSENSE");
    }

    #[test]
    fn invite_url_roundtrip() {
        let code = InviteCode::parse("WXYZ-2345").unwrap();
        let phrase = RecoveryPhrase::parse(PHRASE).unwrap();
        let url = generate_invite_url(&code, &phrase, "https://manylla.com/qual/");
        assert_eq!(
            url,
            "https://manylla.com/qual/sync/WXYZ-2345#0123456789abcdef0123456789abcdef"
        );

        let link = InviteLink::from_url(&url);
        assert_eq!(link.code, Some(code));
        assert_eq!(link.phrase, Some(phrase));
        assert_eq!(link.join_input().as_deref(), Some(PHRASE));
    }

    #[test]
    fn parse_url_lowercase_path_is_uppercased() {
        let link = parse_invite_url("/qual/sync/wxyz-2345", "");
        assert_eq!(link.code.unwrap().as_str(), "WXYZ-2345");
        assert!(link.phrase.is_none());
    }

    #[test]
    fn parse_url_malformed_parts_are_none() {
        let link = parse_invite_url("/sync/ABCD-1234", "#not-a-phrase");
        assert_eq!(link, InviteLink::default());

        let link = parse_invite_url("/share/ABCD-2345", "");
        assert!(link.code.is_none());

        let link = parse_invite_url("/sync/ABCD-23456", "");
        assert!(link.code.is_none());
    }

    #[test]
    fn from_url_without_fragment_falls_back_to_code() {
        let link = InviteLink::from_url("https://manylla.com/sync/ABCD-2345");
        assert!(link.phrase.is_none());
        assert_eq!(link.join_input().as_deref(), Some("ABCD-2345"));
    }

    #[test]
    fn from_str_rejects_bad_code() {
        assert!("ABCD-2345".parse::<InviteCode>().is_ok());
        assert!(matches!(
            "nope".parse::<InviteCode>(),
            Err(crate::error::SyncError::InvalidOrExpiredInvite)
        ));
    }
}
