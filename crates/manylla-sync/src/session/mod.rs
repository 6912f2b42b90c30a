//! Sync session state machine.
//!
//! ```text
//! Disabled -> Enabling -> { Idle <-> Syncing, Error } -> Disabled
//! ```
//!
//! One [`SyncSession`] per device, shared through `Arc`. Push and pull are
//! single-flight: a second call while one is running gets
//! [`SyncError::SyncBusy`]. Enable and disable are serialized by a separate
//! lock. Every transition bumps a generation counter; an in-flight push or
//! pull that finishes after `disable()` sees a different generation and
//! drops its result instead of resurrecting state.


use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use manylla_core::SyncSnapshot;
use manylla_core::time::unix_millis;
use manylla_crypto::{
    CryptoError, DerivedIdentity, KdfParams, RecoveryPhrase, Salt, SyncKey, sync_id_for,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::blob::SyncBlob;
use crate::credentials::{CredentialStore, StoredCredentials, installation_salt};
use crate::error::{SyncError, SyncErrorKind};
use crate::invite::{InviteCode, InviteCodeStore, InviteLink, generate_invite_url, normalize};
use crate::poller::{PollTarget, PollerHandle, spawn_poller};
use crate::remote::{RemoteError, RemoteStore};

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 32;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Disabled,
    Enabling,
    Idle,
    Syncing,
    Error(SyncErrorKind),
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Enabling => f.write_str("enabling"),
            Self::Idle => f.write_str("idle"),
            Self::Syncing => f.write_str("syncing"),
            Self::Error(kind) => write!(f, "error ({kind})"),
        }
    }
}

/// Broadcast to every `subscribe_events()` receiver.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Enabled { sync_id: String },
    Pushed { at: i64 },
    Pulled { snapshot: Arc<SyncSnapshot>, at: i64 },
    Failed(SyncErrorKind),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kdf: KdfParams,
    /// Upper bound on every remote call.
    pub request_timeout: Duration,
    /// Base URL for invite links.
    pub invite_base_url: String,
    /// Write `m2` blobs, deflating large snapshots before sealing.
    pub compress: bool,
}

impl SessionConfig {
    pub fn from_config(config: &manylla_core::Config) -> Self {
        Self {
            kdf: KdfParams {
                memory_kib: config.kdf.memory_kib,
                iterations: config.kdf.iterations,
                parallelism: config.kdf.parallelism,
            },
            request_timeout: config.sync.request_timeout(),
            invite_base_url: config.sync.invite_base_url.clone(),
            compress: config.sync.compress_snapshots,
        }
    }
}

/// Returned by `enable_as_new`: what the user must write down.
#[derive(Debug, Clone)]
pub struct EnabledSync {
    pub sync_id: String,
    pub phrase: RecoveryPhrase,
}

/// A freshly minted invite.
#[derive(Debug, Clone)]
pub struct Invite {
    pub code: InviteCode,
    pub url: String,
    pub expires_at: i64,
}

/// Everything derived from the phrase while sync is on.
#[derive(Debug)]
struct Group {
    phrase: RecoveryPhrase,
    sync_id: String,
    salt: Salt,
    key: SyncKey,
}

impl Group {
    fn from_identity(phrase: RecoveryPhrase, salt: Salt, identity: DerivedIdentity) -> Self {
        Self {
            phrase,
            sync_id: identity.sync_id,
            salt,
            key: identity.key,
        }
    }

    fn seal(&self, snapshot: &SyncSnapshot, compress: bool) -> Result<String, SyncError> {
        Ok(SyncBlob::seal(snapshot, self.salt, &self.key, compress)?.encode())
    }

    /// A blob carrying any salt but ours was not written by this group's
    /// key, even if the envelope happens to open.
    fn open(&self, encoded: &str) -> Result<SyncSnapshot, SyncError> {
        let blob = SyncBlob::decode(encoded)?;
        if blob.salt != self.salt {
            warn!(sync_id = %self.sync_id, "Remote blob salt does not match the group salt");
            return Err(SyncError::DecryptAuthenticationFailed);
        }
        blob.open(&self.key)
    }
}

#[derive(Debug)]
struct State {
    status: SyncStatus,
    group: Option<Arc<Group>>,
    generation: u64,
    /// Last snapshot exchanged with the server, photos replaced by refs.
    last_snapshot: Option<Arc<SyncSnapshot>>,
    last_sync_at: Option<i64>,
    poller: Option<PollerHandle>,
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a push or pull between `begin_sync` and its outcome.
///
/// If the call's future is dropped before [`InFlight::finish`] (a caller
/// timeout, an aborted task), the status goes back to `Idle` instead of
/// staying `Syncing`.
struct InFlight<'a> {
    state: &'a Mutex<State>,
    status_tx: &'a watch::Sender<SyncStatus>,
    generation: u64,
    settled: bool,
}

impl<'a> InFlight<'a> {
    /// The call ran to completion; the caller now owns the status.
    fn finish(mut self) -> (MutexGuard<'a, State>, u64) {
        self.settled = true;
        (lock_state(self.state), self.generation)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock_state(self.state);
        if state.generation == self.generation && state.status == SyncStatus::Syncing {
            state.status = SyncStatus::Idle;
            self.status_tx.send_replace(SyncStatus::Idle);
            debug!("Sync call dropped before finishing, status reset");
        }
    }
}

/// Coordinates enable/join/push/pull/disable against a [`RemoteStore`].
pub struct SyncSession<R, C> {
    remote: Arc<R>,
    credentials: C,
    invites: Mutex<InviteCodeStore>,
    config: SessionConfig,
    state: Mutex<State>,
    /// Single-flight guard shared by push, pull and poll ticks.
    flight: tokio::sync::Mutex<()>,
    /// Serializes enable*, restore and disable.
    transition: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteStore, C: CredentialStore> SyncSession<R, C> {
    pub fn new(
        remote: Arc<R>,
        credentials: C,
        invites: InviteCodeStore,
        config: SessionConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Disabled);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            remote,
            credentials,
            invites: Mutex::new(invites),
            config,
            state: Mutex::new(State {
                status: SyncStatus::Disabled,
                group: None,
                generation: 0,
                last_snapshot: None,
                last_sync_at: None,
                poller: None,
            }),
            flight: tokio::sync::Mutex::new(()),
            transition: tokio::sync::Mutex::new(()),
            status_tx,
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    fn invites(&self) -> MutexGuard<'_, InviteCodeStore> {
        self.invites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn status(&self) -> SyncStatus {
        self.state().status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Whether this device currently holds group credentials.
    pub fn is_enabled(&self) -> bool {
        self.state().group.is_some()
    }

    pub fn sync_id(&self) -> Option<String> {
        self.state().group.as_ref().map(|g| g.sync_id.clone())
    }

    pub fn recovery_phrase(&self) -> Option<RecoveryPhrase> {
        self.state().group.as_ref().map(|g| g.phrase.clone())
    }

    pub fn last_snapshot(&self) -> Option<SyncSnapshot> {
        self.state().last_snapshot.as_deref().cloned()
    }

    pub fn last_sync_at(&self) -> Option<i64> {
        self.state().last_sync_at
    }

    pub fn is_polling(&self) -> bool {
        self.state()
            .poller
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn set_status(&self, state: &mut State, status: SyncStatus) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Record a failure under `state` and hand the error back.
    fn fail<T>(&self, mut state: MutexGuard<'_, State>, err: SyncError) -> Result<T, SyncError> {
        let kind = err.kind();
        self.set_status(&mut state, SyncStatus::Error(kind));
        drop(state);
        warn!(error = %err, kind = %kind, "Sync operation failed");
        self.emit(SyncEvent::Failed(kind));
        Err(err)
    }

    async fn remote_call<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, SyncError> {
        tokio::time::timeout(self.config.request_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(SyncError::from)
    }

    /// Argon2 on the blocking pool.
    async fn derive_identity(
        &self,
        phrase: &RecoveryPhrase,
        salt: Salt,
    ) -> Result<DerivedIdentity, SyncError> {
        let phrase = phrase.clone();
        let params = self.config.kdf;
        tokio::task::spawn_blocking(move || manylla_crypto::derive(&phrase, &salt, &params))
            .await
            .map_err(|e| {
                SyncError::Crypto(CryptoError::KeyDerivationFailed(format!(
                    "derivation task failed: {e}"
                )))
            })?
            .map_err(SyncError::from)
    }

    fn persist_group(&self, group: &Group) -> Result<(), SyncError> {
        let mut credentials = self.credentials.load()?;
        credentials.sync_enabled = true;
        credentials.recovery_phrase = Some(group.phrase.as_str().to_string());
        credentials.sync_id = Some(group.sync_id.clone());
        credentials.salt = Some(group.salt.to_base64());
        self.credentials.save(&credentials)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn begin_enabling(&self) -> Result<(), SyncError> {
        let mut state = self.state();
        if state.group.is_some() {
            return Err(SyncError::AlreadyEnabled);
        }
        state.generation += 1;
        self.set_status(&mut state, SyncStatus::Enabling);
        Ok(())
    }

    /// Commit a confirmed group, or record why it could not be confirmed.
    /// Credentials are only written once the remote round-trip succeeded.
    fn finish_enabling(
        &self,
        outcome: Result<(Group, SyncSnapshot), SyncError>,
    ) -> Result<(EnabledSync, Arc<SyncSnapshot>), SyncError> {
        let outcome = outcome.and_then(|(group, snapshot)| {
            self.persist_group(&group)?;
            Ok((group, snapshot))
        });
        let (group, snapshot) = match outcome {
            Ok(done) => done,
            Err(err) => return self.fail(self.state(), err),
        };
        let mut state = self.state();
        let group = Arc::new(group);
        let snapshot = Arc::new(snapshot);
        state.group = Some(Arc::clone(&group));
        state.last_snapshot = Some(Arc::clone(&snapshot));
        state.last_sync_at = Some(unix_millis());
        self.set_status(&mut state, SyncStatus::Idle);
        drop(state);

        info!(sync_id = %group.sync_id, "Sync enabled");
        self.emit(SyncEvent::Enabled {
            sync_id: group.sync_id.clone(),
        });
        Ok((
            EnabledSync {
                sync_id: group.sync_id.clone(),
                phrase: group.phrase.clone(),
            },
            snapshot,
        ))
    }

    /// Start a new sync group seeded with `initial`.
    ///
    /// The returned phrase is the only way back into the group; show it to
    /// the user.
    pub async fn enable_as_new(&self, initial: &SyncSnapshot) -> Result<EnabledSync, SyncError> {
        let _transition = self.transition.lock().await;
        self.begin_enabling()?;
        let outcome = self.create_group(initial).await;
        self.finish_enabling(outcome).map(|(enabled, _)| enabled)
    }

    async fn create_group(&self, initial: &SyncSnapshot) -> Result<(Group, SyncSnapshot), SyncError> {
        let phrase = RecoveryPhrase::generate();
        let salt = installation_salt(&self.credentials)?;
        let identity = self.derive_identity(&phrase, salt).await?;
        let group = Group::from_identity(phrase, salt, identity);

        let prepared = initial.prepared_for_sync();
        let blob = group.seal(&prepared, self.config.compress)?;
        self.remote_call(self.remote.put_blob(&group.sync_id, &blob))
            .await?;
        Ok((group, prepared))
    }

    /// Join an existing group from a phrase, an invite code or an invite URL.
    ///
    /// The group's blob is fetched and decrypted before anything is
    /// persisted, so a device never believes it joined a group it cannot
    /// read. Input errors are returned without touching the status.
    pub async fn enable_by_joining(&self, input: &str) -> Result<SyncSnapshot, SyncError> {
        let _transition = self.transition.lock().await;
        if self.is_enabled() {
            return Err(SyncError::AlreadyEnabled);
        }
        let phrase = self.resolve_join_input(input)?;
        self.begin_enabling()?;
        let outcome = self.join_group(phrase).await;
        let (_, snapshot) = self.finish_enabling(outcome)?;
        Ok(SyncSnapshot::clone(&snapshot))
    }

    fn resolve_join_input(&self, input: &str) -> Result<RecoveryPhrase, SyncError> {
        let trimmed = input.trim();
        if trimmed.contains("/sync/") {
            let link = InviteLink::from_url(trimmed);
            return match (link.phrase, link.code) {
                (Some(phrase), _) => Ok(phrase),
                (None, Some(code)) => self.resolve_invite(code.as_str()),
                (None, None) => Err(SyncError::InvalidOrExpiredInvite),
            };
        }
        if RecoveryPhrase::is_valid_format(trimmed) {
            return Ok(RecoveryPhrase::parse(trimmed)?);
        }
        if looks_like_invite(trimmed) {
            return self.resolve_invite(trimmed);
        }
        Err(SyncError::InvalidPhraseFormat)
    }

    fn resolve_invite(&self, code: &str) -> Result<RecoveryPhrase, SyncError> {
        let grant = self
            .invites()
            .lookup(code, unix_millis())?
            .ok_or(SyncError::InvalidOrExpiredInvite)?;
        if sync_id_for(&grant.phrase)? != grant.sync_id {
            warn!("Invite entry does not match its recovery phrase");
            return Err(SyncError::InvalidOrExpiredInvite);
        }
        Ok(grant.phrase)
    }

    async fn join_group(&self, phrase: RecoveryPhrase) -> Result<(Group, SyncSnapshot), SyncError> {
        let sync_id = sync_id_for(&phrase)?;
        let remote = self
            .remote_call(self.remote.fetch_blob(&sync_id))
            .await?
            .ok_or(SyncError::GroupNotFound)?;
        let blob = SyncBlob::decode(&remote.encrypted_blob)?;
        let identity = self.derive_identity(&phrase, blob.salt).await?;
        let snapshot: SyncSnapshot = blob.open(&identity.key)?;
        debug!(sync_id = %sync_id, profiles = snapshot.profiles.len(), "Joined group blob decrypted");
        Ok((Group::from_identity(phrase, blob.salt, identity), snapshot))
    }

    /// Rebuild the session from stored credentials without touching the
    /// network. Returns whether sync is now enabled.
    pub async fn restore(&self) -> Result<bool, SyncError> {
        let _transition = self.transition.lock().await;
        if self.is_enabled() {
            return Ok(true);
        }
        let stored = self.credentials.load()?;
        let (true, Some(phrase), Some(salt)) = (
            stored.sync_enabled,
            stored.recovery_phrase.as_deref(),
            stored.salt.as_deref(),
        ) else {
            return Ok(false);
        };
        let phrase = RecoveryPhrase::parse(phrase)?;
        let salt = Salt::from_base64(salt)?;
        let identity = self.derive_identity(&phrase, salt).await?;
        if let Some(stored_id) = &stored.sync_id {
            if *stored_id != identity.sync_id {
                return Err(SyncError::Storage(
                    "stored sync id does not match the stored recovery phrase".into(),
                ));
            }
        }

        let group = Arc::new(Group::from_identity(phrase, salt, identity));
        let mut state = self.state();
        state.generation += 1;
        state.group = Some(Arc::clone(&group));
        self.set_status(&mut state, SyncStatus::Idle);
        drop(state);

        info!(sync_id = %group.sync_id, "Sync session restored");
        self.emit(SyncEvent::Enabled {
            sync_id: group.sync_id.clone(),
        });
        Ok(true)
    }

    /// Turn sync off on this device.
    ///
    /// Stops polling, drops the key and forgets the phrase, including the
    /// copies held by this device's invite codes. The remote blob is left
    /// alone; rejoining needs the phrase again.
    pub async fn disable(&self) -> Result<(), SyncError> {
        let _transition = self.transition.lock().await;
        let (poller, sync_id) = {
            let mut state = self.state();
            state.generation += 1;
            let group = state.group.take();
            state.last_snapshot = None;
            state.last_sync_at = None;
            self.set_status(&mut state, SyncStatus::Disabled);
            (state.poller.take(), group.map(|g| g.sync_id.clone()))
        };
        if let Some(poller) = poller {
            poller.stop();
        }

        let mut credentials = self.credentials.load().unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable credentials replaced while disabling");
            StoredCredentials::default()
        });
        credentials.clear_group();
        self.credentials.save(&credentials)?;

        // Invite rows hold the phrase too.
        let mut invites = self.invites();
        match &sync_id {
            Some(sync_id) => invites.remove_group(sync_id)?,
            None => invites.clear()?,
        };
        drop(invites);

        info!(sync_id = ?sync_id, "Sync disabled");
        self.emit(SyncEvent::Disabled);
        Ok(())
    }

    // =========================================================================
    // Push / pull
    // =========================================================================

    fn begin_sync(&self) -> Result<(Arc<Group>, InFlight<'_>), SyncError> {
        let mut state = self.state();
        let group = state.group.clone().ok_or(SyncError::NotEnabled)?;
        let generation = state.generation;
        self.set_status(&mut state, SyncStatus::Syncing);
        Ok((
            group,
            InFlight {
                state: &self.state,
                status_tx: &self.status_tx,
                generation,
                settled: false,
            },
        ))
    }

    /// Upload `snapshot`, overwriting whatever the server holds.
    ///
    /// Photos are swapped for references first. Last write wins; there is no
    /// merge with a concurrent push from another device.
    pub async fn push(&self, snapshot: &SyncSnapshot) -> Result<(), SyncError> {
        let _flight = self.flight.try_lock().map_err(|_| SyncError::SyncBusy)?;
        let (group, in_flight) = self.begin_sync()?;

        let prepared = snapshot.prepared_for_sync();
        let result = match group.seal(&prepared, self.config.compress) {
            Ok(blob) => {
                self.remote_call(self.remote.put_blob(&group.sync_id, &blob))
                    .await
            }
            Err(e) => Err(e),
        };

        let at = unix_millis();
        let (mut state, generation) = in_flight.finish();
        if state.generation != generation {
            debug!("Discarding push result that finished after disable");
            return Err(SyncError::Cancelled);
        }
        if let Err(err) = result {
            return self.fail(state, err);
        }
        state.last_snapshot = Some(Arc::new(prepared));
        state.last_sync_at = Some(at);
        self.set_status(&mut state, SyncStatus::Idle);
        drop(state);

        debug!(sync_id = %group.sync_id, "Snapshot pushed");
        self.emit(SyncEvent::Pushed { at });
        Ok(())
    }

    /// Download and decrypt the group snapshot. `None` if the server holds
    /// nothing. On failure the previous snapshot is kept.
    pub async fn pull(&self) -> Result<Option<SyncSnapshot>, SyncError> {
        let _flight = self.flight.try_lock().map_err(|_| SyncError::SyncBusy)?;
        let (group, in_flight) = self.begin_sync()?;

        let result = match self
            .remote_call(self.remote.fetch_blob(&group.sync_id))
            .await
        {
            Ok(Some(remote)) => group.open(&remote.encrypted_blob).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        let at = unix_millis();
        let (mut state, generation) = in_flight.finish();
        if state.generation != generation {
            debug!("Discarding pull result that finished after disable");
            return Err(SyncError::Cancelled);
        }
        let snapshot = match result {
            Ok(Some(snapshot)) => Arc::new(snapshot),
            Ok(None) => {
                self.set_status(&mut state, SyncStatus::Idle);
                return Ok(None);
            }
            Err(err) => return self.fail(state, err),
        };
        state.last_snapshot = Some(Arc::clone(&snapshot));
        state.last_sync_at = Some(at);
        self.set_status(&mut state, SyncStatus::Idle);
        drop(state);

        debug!(sync_id = %group.sync_id, profiles = snapshot.profiles.len(), "Snapshot pulled");
        self.emit(SyncEvent::Pulled {
            snapshot: Arc::clone(&snapshot),
            at,
        });
        Ok(Some(SyncSnapshot::clone(&snapshot)))
    }

    // =========================================================================
    // Invites
    // =========================================================================

    /// Mint an invite for the current group, valid for 24 hours from `now`.
    pub fn create_invite(&self, now: i64) -> Result<Invite, SyncError> {
        let group = self.state().group.clone().ok_or(SyncError::NotEnabled)?;
        let mut invites = self.invites();
        let code = invites.unused_code();
        let entry = invites.store(&code, &group.sync_id, &group.phrase, now)?;
        let url = generate_invite_url(&code, &group.phrase, &self.config.invite_base_url);
        Ok(Invite {
            code,
            url,
            expires_at: entry.expires_at,
        })
    }

    /// Drop expired invites. Returns how many were removed.
    pub fn sweep_invites(&self, now: i64) -> Result<usize, SyncError> {
        self.invites().sweep_expired(now)
    }
}

// =============================================================================
// Polling
// =============================================================================

impl<R: RemoteStore, C: CredentialStore + 'static> SyncSession<R, C> {
    /// Pull every `interval` in the background until `stop_polling` or
    /// `disable`. Calling it again while a poller runs is a no-op.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> Result<(), SyncError> {
        let mut state = self.state();
        if state.group.is_none() {
            return Err(SyncError::NotEnabled);
        }
        if state.poller.as_ref().is_some_and(|p| !p.is_finished()) {
            return Ok(());
        }
        state.poller = Some(spawn_poller(Arc::downgrade(self), interval));
        info!(interval_secs = interval.as_secs(), "Sync polling started");
        Ok(())
    }

    pub fn stop_polling(&self) {
        let poller = self.state().poller.take();
        if let Some(poller) = poller {
            poller.stop();
        }
    }
}

impl<R: RemoteStore, C: CredentialStore + 'static> PollTarget for SyncSession<R, C> {
    async fn poll_once(&self) {
        let swept = self.sweep_invites(unix_millis());
        if let Err(e) = swept {
            warn!(error = %e, "Invite sweep failed");
        }
        match self.pull().await {
            Ok(Some(_)) => debug!("Poll tick pulled a snapshot"),
            Ok(None) => debug!("Poll tick found no remote snapshot"),
            Err(SyncError::SyncBusy) => debug!("Sync in flight, skipping poll tick"),
            // Failures were already logged and broadcast by `fail`.
            Err(_) => {}
        }
    }
}

/// Eight symbols once whitespace and the dash are removed.
fn looks_like_invite(input: &str) -> bool {
    normalize(input).chars().filter(|c| *c != '-').count() == 8
}
