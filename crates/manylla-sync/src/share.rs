//! Encrypted, time-limited share links.
//!
//! A share is a filtered copy of one profile sealed under a fresh random
//! key. The server stores the ciphertext under an access token; the key
//! only ever travels in the URL fragment, which browsers do not send.
//!
//! ```text
//! {base_url}/share/{XXXX-XXXX}#{base64 key}
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use manylla_core::ChildProfile;
use manylla_core::time::{DAY_MS, unix_millis};
use manylla_crypto::{EncryptedEnvelope, ShareKey, open_json, seal_json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SyncError;
use crate::invite::InviteCode;
use crate::remote::{ShareRequest, ShareStore};

/// Payload layout version of encrypted shares.
pub const SHARE_VERSION: u32 = 2;

/// Profile keys that hold free-form summaries outside any category.
const UNCATEGORIZED_KEYS: [&str; 2] = ["quickInfoPanels", "quickInfo"];

/// Who the share is meant for. Lets the server apply per-audience policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    Education,
    Support,
    Medical,
    #[default]
    Custom,
}

impl RecipientType {
    pub const ALL: [Self; 4] = [Self::Education, Self::Support, Self::Medical, Self::Custom];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Education => "education",
            Self::Support => "support",
            Self::Medical => "medical",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown recipient type: {s}"))
    }
}

/// A profile reduced to what one recipient may see.
///
/// Only constructible through [`SharedProfile::new`], so a value of this
/// type has always been filtered.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedProfile(ChildProfile);

impl SharedProfile {
    /// Keep entries (and category definitions) in `categories`; drop the
    /// photo and photo reference unless `include_photo`.
    pub fn new(profile: &ChildProfile, categories: &[String], include_photo: bool) -> Self {
        let mut shared = profile.clone();
        shared
            .entries
            .retain(|entry| categories.contains(&entry.category));
        shared
            .categories
            .retain(|category| categories.contains(&category.id));
        for key in UNCATEGORIZED_KEYS {
            shared.extra.remove(key);
        }
        shared.photo_ref = None;
        if !include_photo {
            shared.photo = None;
        }
        Self(shared)
    }

    pub const fn profile(&self) -> &ChildProfile {
        &self.0
    }

    pub fn into_inner(self) -> ChildProfile {
        self.0
    }
}

/// The sealed plaintext of a share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEnvelope {
    pub profile: ChildProfile,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub expires_at: i64,
    pub version: u32,
}

impl ShareEnvelope {
    pub fn new(shared: SharedProfile, created_at: i64, expiration_days: u32) -> Self {
        Self {
            profile: shared.into_inner(),
            created_at,
            expires_at: created_at + i64::from(expiration_days) * DAY_MS,
            version: SHARE_VERSION,
        }
    }

    pub const fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// What the user picked in the share dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareOptions {
    pub categories: Vec<String>,
    pub include_photo: bool,
    pub expiration_days: u32,
    pub recipient: RecipientType,
}

/// A created share. Hand `url` to the recipient; nothing else needs to leave
/// the device.
#[derive(Debug, Clone)]
pub struct ShareLink {
    pub url: String,
    pub access_token: InviteCode,
    pub key: ShareKey,
    pub created_at: i64,
    pub expires_at: i64,
}

impl ShareLink {
    /// Split a share URL into its access token and key.
    pub fn parse_url(url: &str) -> Result<(InviteCode, ShareKey), SyncError> {
        let invalid = || SyncError::InvalidOrExpiredInvite;
        let (before, fragment) = url.trim().split_once('#').ok_or_else(invalid)?;
        let (_, token) = before.rsplit_once("/share/").ok_or_else(invalid)?;
        let token = InviteCode::parse(token.trim_end_matches('/')).ok_or_else(invalid)?;
        let key = ShareKey::from_base64(fragment)?;
        Ok((token, key))
    }

    /// Text to send alongside the link.
    pub fn message(&self, child_name: &str) -> String {
        let days = (self.expires_at - self.created_at) / DAY_MS;
        format!(
            "Here's a secure encrypted link to view {child_name}'s information:\n\n{}\n\n\
             This link will expire in {}.\n\n\
             Note: This link contains encrypted data. Please use the complete link exactly as provided.",
            self.url,
            describe_expiration(days)
        )
    }
}

/// `"1 day"`, `"30 days"`, `"3 months"`.
pub fn describe_expiration(days: i64) -> String {
    match days {
        ..=1 => "1 day".to_string(),
        2..=30 => format!("{days} days"),
        _ => {
            let months = (days + 15) / 30;
            if months == 1 {
                "1 month".to_string()
            } else {
                format!("{months} months")
            }
        }
    }
}

/// Decrypt a share payload as fetched by the recipient.
pub fn open_share(encrypted_data: &str, key: &ShareKey) -> Result<ShareEnvelope, SyncError> {
    let envelope = EncryptedEnvelope::from_base64(encrypted_data)?;
    Ok(open_json(&envelope, key)?)
}

/// Builds share links and uploads their ciphertext.
pub struct ShareLinkBuilder<S> {
    store: Arc<S>,
    base_url: String,
    max_expiration_days: u32,
    request_timeout: Duration,
}

impl<S: ShareStore> ShareLinkBuilder<S> {
    pub fn new(
        store: Arc<S>,
        base_url: &str,
        max_expiration_days: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_expiration_days,
            request_timeout,
        }
    }

    pub fn from_config(store: Arc<S>, config: &manylla_core::Config) -> Self {
        Self::new(
            store,
            &config.share.base_url,
            config.share.max_expiration_days,
            config.sync.request_timeout(),
        )
    }

    pub async fn build(
        &self,
        profile: &ChildProfile,
        options: &ShareOptions,
    ) -> Result<ShareLink, SyncError> {
        self.build_at(profile, options, unix_millis()).await
    }

    /// Same as [`build`](Self::build) with an explicit creation time.
    pub async fn build_at(
        &self,
        profile: &ChildProfile,
        options: &ShareOptions,
        now: i64,
    ) -> Result<ShareLink, SyncError> {
        let days = options.expiration_days;
        let invalid = || SyncError::InvalidExpiration {
            requested: days,
            max: self.max_expiration_days,
        };
        if days == 0 || days > self.max_expiration_days {
            return Err(invalid());
        }
        // The server takes hours as a u32.
        let expiry_hours = days.checked_mul(24).ok_or_else(invalid)?;

        let shared = SharedProfile::new(profile, &options.categories, options.include_photo);
        let envelope = ShareEnvelope::new(shared, now, days);
        let key = ShareKey::generate();
        let sealed = seal_json(&envelope, &key)?;
        let access_token = InviteCode::generate();

        let request = ShareRequest {
            access_code: access_token.to_string(),
            encrypted_data: sealed.to_base64(),
            recipient_type: options.recipient,
            expiry_hours,
        };
        tokio::time::timeout(self.request_timeout, self.store.create_share(&request))
            .await
            .map_err(|_| SyncError::Timeout)??;

        info!(
            recipient = %options.recipient,
            categories = options.categories.len(),
            include_photo = options.include_photo,
            expiration_days = days,
            "Share link created"
        );
        let url = format!("{}/share/{}#{}", self.base_url, access_token, key.to_base64());
        Ok(ShareLink {
            url,
            access_token,
            key,
            created_at: now,
            expires_at: envelope.expires_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::invite::validate_format;
    use crate::remote::MemoryRemote;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn profile() -> ChildProfile {
        serde_json::from_value(json!({
            "id": "p1",
            "name": "Ellie Smith",
            "preferredName": "Ellie",
            "photo": "data:image/jpeg;base64,photo",
            "photoRef": {"id": "photo_p1", "hasPhoto": true},
            "entries": [
                {"id": "1", "category": "medical", "title": "Allergy", "description": "Peanuts"},
                {"id": "2", "category": "behavioral", "title": "Triggers", "description": "Loud noises"},
                {"id": "3", "category": "medical", "title": "Medication", "description": "None"}
            ],
            "categories": [
                {"id": "medical", "name": "medical", "displayName": "Medical"},
                {"id": "behavioral", "name": "behavioral", "displayName": "Behavioral"}
            ],
            "quickInfoPanels": [{"id": "1", "content": "Quick info"}]
        }))
        .unwrap()
    }

    fn options(categories: &[&str], include_photo: bool, days: u32) -> ShareOptions {
        ShareOptions {
            categories: categories.iter().map(ToString::to_string).collect(),
            include_photo,
            expiration_days: days,
            recipient: RecipientType::Medical,
        }
    }

    fn builder(remote: &Arc<MemoryRemote>) -> ShareLinkBuilder<MemoryRemote> {
        ShareLinkBuilder::new(
            Arc::clone(remote),
            "https://manylla.com/qual/",
            365,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn shared_profile_filters_categories_and_photo() {
        let shared = SharedProfile::new(&profile(), &["medical".to_string()], false);
        let p = shared.profile();
        assert_eq!(p.entries.len(), 2);
        assert!(p.entries.iter().all(|e| e.category == "medical"));
        assert_eq!(p.categories.len(), 1);
        assert!(p.photo.is_none());
        assert!(p.photo_ref.is_none());
        assert!(!p.extra.contains_key("quickInfoPanels"));
    }

    #[test]
    fn shared_profile_keeps_photo_when_asked() {
        let shared = SharedProfile::new(&profile(), &["medical".to_string()], true);
        assert_eq!(
            shared.profile().photo.as_deref(),
            Some("data:image/jpeg;base64,photo")
        );
        assert!(shared.profile().photo_ref.is_none());
    }

    #[test]
    fn envelope_expiry_is_days_after_creation() {
        let shared = SharedProfile::new(&profile(), &[], false);
        let envelope = ShareEnvelope::new(shared, NOW, 7);
        assert_eq!(envelope.expires_at, NOW + 7 * 86_400_000);
        assert_eq!(envelope.version, 2);
        assert!(envelope.profile.entries.is_empty());
        assert!(!envelope.is_expired(envelope.expires_at));
        assert!(envelope.is_expired(envelope.expires_at + 1));
    }

    #[tokio::test]
    async fn medical_share_without_photo() {
        let remote = Arc::new(MemoryRemote::new());
        let link = builder(&remote)
            .build_at(&profile(), &options(&["medical"], false, 7), NOW)
            .await
            .unwrap();

        assert!(validate_format(link.access_token.as_str()));
        assert!(
            link.url
                .starts_with(&format!("https://manylla.com/qual/share/{}#", link.access_token))
        );
        assert_eq!(link.expires_at, NOW + 7 * DAY_MS);

        let shares = remote.shares();
        assert_eq!(shares.len(), 1);
        let request = &shares[0];
        assert_eq!(request.access_code, link.access_token.as_str());
        assert_eq!(request.recipient_type, RecipientType::Medical);
        assert_eq!(request.expiry_hours, 168);
        assert!(!request.encrypted_data.contains("Ellie"));

        let (token, key) = ShareLink::parse_url(&link.url).unwrap();
        assert_eq!(token, link.access_token);
        let opened = open_share(&request.encrypted_data, &key).unwrap();

        let plaintext = serde_json::to_value(&opened).unwrap();
        assert!(plaintext["profile"].get("photo").is_none());
        assert!(
            opened
                .profile
                .entries
                .iter()
                .all(|e| e.category == "medical")
        );
        assert_eq!(opened.created_at, NOW);
        assert_eq!(opened.expires_at, NOW + 7 * DAY_MS);
    }

    #[tokio::test]
    async fn key_never_reaches_the_server() {
        let remote = Arc::new(MemoryRemote::new());
        let link = builder(&remote)
            .build_at(&profile(), &options(&["medical"], true, 1), NOW)
            .await
            .unwrap();
        let request = &remote.shares()[0];
        let encoded_key = link.key.to_base64();
        assert!(!request.encrypted_data.contains(&encoded_key));
        assert!(!serde_json::to_string(request).unwrap().contains(&encoded_key));
    }

    #[tokio::test]
    async fn each_share_gets_a_fresh_key_and_token() {
        let remote = Arc::new(MemoryRemote::new());
        let b = builder(&remote);
        let first = b
            .build_at(&profile(), &options(&["medical"], false, 7), NOW)
            .await
            .unwrap();
        let second = b
            .build_at(&profile(), &options(&["medical"], false, 7), NOW)
            .await
            .unwrap();
        assert_ne!(first.key, second.key);
        assert_ne!(first.url, second.url);
    }

    #[tokio::test]
    async fn out_of_range_expiration_is_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let b = builder(&remote);
        for days in [0, 366] {
            assert!(matches!(
                b.build_at(&profile(), &options(&["medical"], false, days), NOW)
                    .await,
                Err(SyncError::InvalidExpiration { max: 365, .. })
            ));
        }
        assert!(remote.shares().is_empty());
    }

    #[tokio::test]
    async fn expiration_too_long_for_hours_is_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let b = ShareLinkBuilder::new(
            Arc::clone(&remote),
            "https://manylla.com/qual",
            u32::MAX,
            Duration::from_secs(5),
        );
        let days = u32::MAX / 24 + 1;
        assert!(matches!(
            b.build_at(&profile(), &options(&["medical"], false, days), NOW)
                .await,
            Err(SyncError::InvalidExpiration { requested, max: u32::MAX }) if requested == days
        ));
        assert!(remote.shares().is_empty());

        let longest = u32::MAX / 24;
        let link = b
            .build_at(&profile(), &options(&["medical"], false, longest), NOW)
            .await
            .unwrap();
        assert_eq!(remote.shares()[0].expiry_hours, longest * 24);
        assert!(link.expires_at > NOW);
    }

    #[tokio::test]
    async fn server_failure_surfaces_as_network_error() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failure(Some(500));
        assert!(matches!(
            builder(&remote)
                .build_at(&profile(), &options(&["medical"], false, 7), NOW)
                .await,
            Err(SyncError::Network(_))
        ));
    }

    #[test]
    fn parse_url_rejects_missing_parts() {
        assert!(ShareLink::parse_url("https://manylla.com/share/ABCD-2345").is_err());
        assert!(ShareLink::parse_url("https://manylla.com/sync/ABCD-2345#AAAA").is_err());
        assert!(matches!(
            ShareLink::parse_url("https://manylla.com/share/ABCD-2345#AAAA"),
            Err(SyncError::Crypto(_))
        ));
    }

    #[test]
    fn wrong_key_cannot_open_share() {
        let key = ShareKey::generate();
        let shared = SharedProfile::new(&profile(), &["medical".to_string()], false);
        let sealed = seal_json(&ShareEnvelope::new(shared, NOW, 7), &key).unwrap();
        assert!(matches!(
            open_share(&sealed.to_base64(), &ShareKey::generate()),
            Err(SyncError::DecryptAuthenticationFailed)
        ));
    }

    #[test]
    fn recipient_type_parses_and_serializes_lowercase() {
        assert_eq!(
            "Education".parse::<RecipientType>().unwrap(),
            RecipientType::Education
        );
        assert!("doctor".parse::<RecipientType>().is_err());
        assert_eq!(
            serde_json::to_value(RecipientType::Support).unwrap(),
            json!("support")
        );
    }

    #[test]
    fn expiration_wording() {
        assert_eq!(describe_expiration(1), "1 day");
        assert_eq!(describe_expiration(30), "30 days");
        assert_eq!(describe_expiration(90), "3 months");
        assert_eq!(describe_expiration(180), "6 months");
    }

    #[test]
    fn message_mentions_child_and_expiry() {
        let link = ShareLink {
            url: "https://manylla.com/qual/share/ABCD-2345#key".into(),
            access_token: InviteCode::parse("ABCD-2345").unwrap(),
            key: ShareKey::generate(),
            created_at: NOW,
            expires_at: NOW + 7 * DAY_MS,
        };
        let message = link.message("Ellie");
        assert!(message.contains("Ellie's information"));
        assert!(message.contains("7 days"));
        assert!(message.contains(&link.url));
    }
}
