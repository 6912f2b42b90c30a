//! Configuration resolution for Manylla sync.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/manylla/settings.json`)
//! 3. Explicit config file (e.g. `--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a file that only sets `sync.api_url`
//! keeps every other value from the lower layers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete Manylla configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub share: ShareConfig,
    pub kdf: KdfConfig,
    /// Where credentials and the invite table live. `None` = platform default.
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Blob server and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the sync/share API (`PUT {api_url}/sync/{id}`).
    pub api_url: String,
    /// Base URL used when building invite links.
    pub invite_base_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Deflate large snapshots before sealing them.
    pub compress_snapshots: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "https://manylla.com/qual/api".to_string(),
            invite_base_url: "https://manylla.com/qual".to_string(),
            poll_interval_secs: 60,
            request_timeout_secs: 30,
            compress_snapshots: true,
        }
    }
}

impl SyncConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Share link settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShareConfig {
    /// Base URL of share links (`{base_url}/share/{token}#{key}`).
    pub base_url: String,
    pub default_expiration_days: u32,
    pub max_expiration_days: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: "https://manylla.com/qual".to_string(),
            default_expiration_days: 7,
            max_expiration_days: 365,
        }
    }
}

/// Argon2id cost used for the sync key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Config {
    /// The configured data directory, or the platform default.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(default_data_dir)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_values(&mut merged, load_config_value(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_values(&mut merged, load_config_value(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("manylla").join("settings.json"))
}

/// Default directory for credentials and the invite table.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("manylla"))
}

fn load_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`: objects merge per key, anything else
/// replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `MANYLLA_*` overrides. `lookup` abstracts the environment so tests
/// do not have to mutate process state.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("MANYLLA_API_URL") {
        config.sync.api_url = val;
    }
    if let Some(val) = lookup("MANYLLA_INVITE_BASE_URL") {
        config.sync.invite_base_url = val;
    }
    if let Some(val) = lookup("MANYLLA_SHARE_BASE_URL") {
        config.share.base_url = val;
    }
    if let Some(n) = lookup("MANYLLA_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.sync.poll_interval_secs = n;
    }
    if let Some(n) = lookup("MANYLLA_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.sync.request_timeout_secs = n;
    }
    if let Some(val) = lookup("MANYLLA_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("MANYLLA_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}
