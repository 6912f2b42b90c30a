//! Shared setup for every command: config, data directory, remote, session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use manylla_core::config::load_config;
use manylla_core::time::unix_millis;
use manylla_core::{Config, SyncSnapshot};
use manylla_sync::{
    FileCredentialStore, HttpRemote, InviteCodeStore, RemoteConfig, SessionConfig, SyncSession,
    device_key_in,
};
use serde::Serialize;

use crate::cli::Cli;

/// File in the data directory holding pending invites.
pub const INVITES_FILE: &str = "invites.json";

pub type CliSession = SyncSession<HttpRemote, FileCredentialStore>;

pub struct Context {
    pub config: Config,
    pub data_dir: PathBuf,
    pub remote: Arc<HttpRemote>,
}

impl Context {
    /// Resolve settings: files, then `MANYLLA_*` env, then command-line flags.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = load_config(cli.config.as_deref())?;
        if let Some(dir) = &cli.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(url) = &cli.api_url {
            config.sync.api_url.clone_from(url);
        }
        let data_dir = config
            .resolved_data_dir()
            .context("No data directory available; pass --data-dir")?;
        let remote = HttpRemote::new(&RemoteConfig {
            base_url: config.sync.api_url.clone(),
            timeout: config.sync.request_timeout(),
        })?;
        Ok(Self {
            config,
            data_dir,
            remote: Arc::new(remote),
        })
    }

    pub fn session(&self) -> anyhow::Result<Arc<CliSession>> {
        let key = device_key_in(&self.data_dir)?;
        let invites = InviteCodeStore::open(
            &self.data_dir.join(INVITES_FILE),
            key.clone(),
            unix_millis(),
        )?;
        let credentials =
            FileCredentialStore::new(self.data_dir.join(FileCredentialStore::FILE_NAME), key);
        Ok(Arc::new(SyncSession::new(
            Arc::clone(&self.remote),
            credentials,
            invites,
            SessionConfig::from_config(&self.config),
        )))
    }

    /// A session rebuilt from stored credentials; errors if sync is off.
    pub async fn enabled_session(&self) -> anyhow::Result<Arc<CliSession>> {
        let session = self.session()?;
        if !session.restore().await? {
            anyhow::bail!(
                "Sync is not enabled on this device. Run `manylla enable` or `manylla join` first."
            );
        }
        Ok(session)
    }
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<SyncSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a snapshot", path.display()))
}

/// Pretty JSON to `path`, or to `out` when no path is given.
pub fn write_json(
    value: &impl Serialize,
    path: Option<&Path>,
    out: &mut impl std::io::Write,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => writeln!(out, "{json}")?,
    }
    Ok(())
}
