//! Local invite table.
//!
//! Maps invite codes to the group they unlock. Entries expire after
//! [`INVITE_TTL_MS`]; expired rows are dropped lazily on lookup and by
//! [`InviteCodeStore::sweep_expired`], which the poller calls on every tick.
//! A file-backed table seals each row's phrase under the device key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use manylla_crypto::{DeviceKey, RecoveryPhrase};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{INVITE_TTL_MS, InviteCode, normalize};
use crate::credentials::{read_private, write_private};
use crate::error::SyncError;

/// One row of the invite table.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteEntry {
    pub sync_id: String,
    pub recovery_phrase: String,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; the entry is dead once this is in the past.
    pub expires_at: i64,
}

impl InviteEntry {
    pub const fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

impl std::fmt::Debug for InviteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteEntry")
            .field("sync_id", &self.sync_id)
            .field("recovery_phrase", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What a valid invite resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteGrant {
    pub sync_id: String,
    pub phrase: RecoveryPhrase,
}

/// On-disk row: the phrase sealed under the device key.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SealedEntry {
    sync_id: String,
    sealed_phrase: String,
    created_at: i64,
    expires_at: i64,
}

#[derive(Default, Serialize, Deserialize)]
struct TableFile {
    #[serde(default)]
    invites: HashMap<String, SealedEntry>,
}

#[derive(Debug)]
struct Backing {
    path: PathBuf,
    key: DeviceKey,
}

/// Invite table, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct InviteCodeStore {
    backing: Option<Backing>,
    invites: HashMap<String, InviteEntry>,
}

impl InviteCodeStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the table from `path` (missing file = empty table) and drop
    /// anything already expired. Rows that do not open under `key` are
    /// dropped with a warning.
    pub fn open(path: &Path, key: DeviceKey, now: i64) -> Result<Self, SyncError> {
        let file: TableFile = if path.exists() {
            let data = read_private(path)?;
            serde_json::from_str(&data).map_err(|e| {
                SyncError::Storage(format!("Failed to parse invite table: {e}"))
            })?
        } else {
            TableFile::default()
        };
        let mut invites = HashMap::with_capacity(file.invites.len());
        for (code, row) in file.invites {
            match key.open_str(&row.sealed_phrase) {
                Ok(recovery_phrase) => {
                    invites.insert(
                        code,
                        InviteEntry {
                            sync_id: row.sync_id,
                            recovery_phrase,
                            created_at: row.created_at,
                            expires_at: row.expires_at,
                        },
                    );
                }
                Err(e) => warn!(error = %e, "Dropping invite row sealed under another key"),
            }
        }
        let mut store = Self {
            backing: Some(Backing {
                path: path.to_path_buf(),
                key,
            }),
            invites,
        };
        store.sweep_expired(now)?;
        Ok(store)
    }

    fn save(&self) -> Result<(), SyncError> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let mut file = TableFile::default();
        for (code, entry) in &self.invites {
            file.invites.insert(
                code.clone(),
                SealedEntry {
                    sync_id: entry.sync_id.clone(),
                    sealed_phrase: backing.key.seal_str(&entry.recovery_phrase)?,
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                },
            );
        }
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize invite table: {e}")))?;
        write_private(&backing.path, json.as_bytes())
    }

    /// A fresh code not already present in the table.
    pub fn unused_code(&self) -> InviteCode {
        loop {
            let code = InviteCode::generate();
            if !self.invites.contains_key(code.as_str()) {
                return code;
            }
        }
    }

    /// Record `code` for the group, valid for 24 hours from `now`.
    pub fn store(
        &mut self,
        code: &InviteCode,
        sync_id: &str,
        phrase: &RecoveryPhrase,
        now: i64,
    ) -> Result<InviteEntry, SyncError> {
        let entry = InviteEntry {
            sync_id: sync_id.to_string(),
            recovery_phrase: phrase.as_str().to_string(),
            created_at: now,
            expires_at: now + INVITE_TTL_MS,
        };
        self.invites.insert(code.as_str().to_string(), entry.clone());
        self.save()?;
        info!(sync_id = %sync_id, expires_at = entry.expires_at, "Invite code stored");
        Ok(entry)
    }

    /// Resolve a code typed by the user.
    ///
    /// Badly shaped input is rejected before touching the table. An expired
    /// entry is removed (and the removal persisted) and reported as absent.
    pub fn lookup(&mut self, code: &str, now: i64) -> Result<Option<InviteGrant>, SyncError> {
        let Some(code) = InviteCode::parse(code) else {
            return Ok(None);
        };
        let key = code.as_str();
        let Some(entry) = self.invites.get(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            self.invites.remove(key);
            self.save()?;
            debug!("Expired invite code removed on lookup");
            return Ok(None);
        }
        let phrase = RecoveryPhrase::parse(&entry.recovery_phrase)?;
        Ok(Some(InviteGrant {
            sync_id: entry.sync_id.clone(),
            phrase,
        }))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&mut self, now: i64) -> Result<usize, SyncError> {
        let before = self.invites.len();
        self.invites.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.invites.len();
        if removed > 0 {
            self.save()?;
            debug!(removed, "Swept expired invite codes");
        }
        Ok(removed)
    }

    /// Forget every invite for `sync_id`. Returns how many were removed.
    pub fn remove_group(&mut self, sync_id: &str) -> Result<usize, SyncError> {
        let before = self.invites.len();
        self.invites.retain(|_, entry| entry.sync_id != sync_id);
        let removed = before - self.invites.len();
        if removed > 0 {
            self.save()?;
            info!(sync_id = %sync_id, removed, "Invite codes for group removed");
        }
        Ok(removed)
    }

    /// Forget every invite.
    pub fn clear(&mut self) -> Result<usize, SyncError> {
        let removed = self.invites.len();
        self.invites.clear();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Whether a live or not-yet-swept entry exists for `code`.
    pub fn contains(&self, code: &str) -> bool {
        self.invites.contains_key(&normalize(code))
    }

    pub fn len(&self) -> usize {
        self.invites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const PHRASE: &str = "00112233445566778899aabbccddeeff";

    fn phrase() -> RecoveryPhrase {
        RecoveryPhrase::parse(PHRASE).unwrap()
    }

    fn code(s: &str) -> InviteCode {
        InviteCode::parse(s).unwrap()
    }

    fn key() -> DeviceKey {
        DeviceKey::from_bytes([5; 32])
    }

    #[test]
    fn lookup_within_ttl_returns_grant() {
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let grant = store.lookup("abcd-2345", T0 + 1000).unwrap().unwrap();
        assert_eq!(grant.sync_id, "sync-1");
        assert_eq!(grant.phrase, phrase());
    }

    #[test]
    fn lookup_tolerates_spaces_in_input() {
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert!(store.lookup(" abcd - 2345 ", T0).unwrap().is_some());
    }

    #[test]
    fn entry_at_exact_expiry_is_still_valid() {
        let mut store = InviteCodeStore::in_memory();
        let entry = store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert_eq!(entry.expires_at, T0 + 86_400_000);
        assert!(
            store
                .lookup("ABCD-2345", entry.expires_at)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn expired_entry_is_not_found_and_removed() {
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let later = T0 + INVITE_TTL_MS + 1;
        assert!(store.lookup("ABCD-2345", later).unwrap().is_none());
        assert!(!store.contains("ABCD-2345"));
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_code_never_hits_the_table() {
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert!(store.lookup("ABCD-1234", T0).unwrap().is_none());
        assert!(store.lookup("", T0).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn expires_one_millisecond_after_ttl() {
        let mut store = InviteCodeStore::in_memory();
        let entry = store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), 1000)
            .unwrap();
        assert_eq!(entry.created_at, 1000);
        assert_eq!(entry.expires_at, 1000 + 86_400_000);

        assert!(store.lookup("ABCD-2345", 1000 + 86_400_001).unwrap().is_none());
        assert!(!store.contains("ABCD-2345"));
    }

    #[test]
    fn retrievable_just_before_a_day_but_not_after() {
        const MINUTE: i64 = 60_000;
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        let almost_a_day = T0 + 23 * 60 * MINUTE + 59 * MINUTE;
        assert!(store.lookup("ABCD-2345", almost_a_day).unwrap().is_some());
        let just_over = T0 + 24 * 60 * MINUTE + MINUTE;
        assert!(store.lookup("ABCD-2345", just_over).unwrap().is_none());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let mut store = InviteCodeStore::in_memory();
        store
            .store(&code("AAAA-2222"), "old", &phrase(), T0)
            .unwrap();
        store
            .store(&code("BBBB-3333"), "new", &phrase(), T0 + INVITE_TTL_MS)
            .unwrap();

        let removed = store.sweep_expired(T0 + INVITE_TTL_MS + 1).unwrap();
        assert_eq!(removed, 1);
        assert!(!store.contains("AAAA-2222"));
        assert!(store.contains("BBBB-3333"));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");

        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let mut reopened = InviteCodeStore::open(&path, key(), T0 + 10).unwrap();
        assert_eq!(reopened.len(), 1);
        let grant = reopened.lookup("ABCD-2345", T0 + 10).unwrap().unwrap();
        assert_eq!(grant.sync_id, "sync-1");
    }

    #[test]
    fn lazy_removal_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let later = T0 + INVITE_TTL_MS + 1;

        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert!(store.lookup("ABCD-2345", later).unwrap().is_none());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("ABCD-2345"));
    }

    #[test]
    fn open_sweeps_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let reopened = InviteCodeStore::open(&path, key(), T0 + INVITE_TTL_MS + 1).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn corrupted_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        write_private(&path, b"{ nope").unwrap();
        assert!(matches!(
            InviteCodeStore::open(&path, key(), T0),
            Err(SyncError::Storage(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn phrase_is_sealed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("sealedPhrase"));
        assert!(!raw.contains(PHRASE));
    }

    #[test]
    fn rows_sealed_under_another_key_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();

        let mut stranger = InviteCodeStore::open(&path, DeviceKey::generate(), T0).unwrap();
        assert!(stranger.is_empty());
        assert!(stranger.lookup("ABCD-2345", T0).unwrap().is_none());
    }

    #[test]
    fn remove_group_drops_only_that_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("AAAA-2222"), "sync-1", &phrase(), T0)
            .unwrap();
        store
            .store(&code("BBBB-3333"), "sync-1", &phrase(), T0)
            .unwrap();
        store
            .store(&code("CCCC-4444"), "sync-2", &phrase(), T0)
            .unwrap();

        assert_eq!(store.remove_group("sync-1").unwrap(), 2);
        assert!(!store.contains("AAAA-2222"));
        assert!(store.contains("CCCC-4444"));
        assert_eq!(store.remove_group("sync-1").unwrap(), 0);

        let reopened = InviteCodeStore::open(&path, key(), T0).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains("CCCC-4444"));
    }

    #[test]
    fn clear_empties_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert_eq!(store.clear().unwrap(), 1);
        assert!(InviteCodeStore::open(&path, key(), T0).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_table_is_refused() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invites.json");
        let mut store = InviteCodeStore::open(&path, key(), T0).unwrap();
        store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            InviteCodeStore::open(&path, key(), T0),
            Err(SyncError::Storage(msg)) if msg.contains("insecure permissions")
        ));
    }

    #[test]
    fn unused_code_avoids_existing_entries() {
        let mut store = InviteCodeStore::in_memory();
        let first = store.unused_code();
        store.store(&first, "sync-1", &phrase(), T0).unwrap();
        for _ in 0..100 {
            assert_ne!(store.unused_code(), first);
        }
    }

    #[test]
    fn debug_redacts_phrase() {
        let mut store = InviteCodeStore::in_memory();
        let entry = store
            .store(&code("ABCD-2345"), "sync-1", &phrase(), T0)
            .unwrap();
        assert!(!format!("{entry:?}").contains(PHRASE));
    }
}
