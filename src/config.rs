//! Configuration for the sync engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`<vault>/.vaultsync/config.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `VAULTSYNC_` and use double
//! underscores to separate nested levels:
//! - `VAULTSYNC_SYNC__EXTERNAL_ROOT=/mnt/mirror` sets `sync.external_root`
//! - `VAULTSYNC_SYNC__SYNC_INTERVAL_SECS=300` sets `sync.sync_interval_secs`
//! - `VAULTSYNC_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory under the vault root that holds engine state.
pub const CONFIG_DIR: &str = ".vaultsync";
/// Configuration file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode.
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Synchronization configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which managed paths participate in synchronization.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Sync everything except paths under an excluded prefix.
    AllExceptExcluded,
    /// Sync only paths under an included prefix or an external folder.
    IncludeListOnly,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Root of the external mirror directory. Absent = engine is a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_root: Option<PathBuf>,

    /// Propagate vault writes to the external store as they happen.
    #[serde(default = "default_true")]
    pub sync_on_write: bool,

    /// Interval for periodic full synchronization, in seconds. 0 disables.
    #[serde(default)]
    pub sync_interval_secs: u64,

    /// Vault path prefixes excluded from sync (all-except-excluded mode).
    #[serde(default)]
    pub excluded_paths: IndexSet<String>,

    /// Vault path prefixes included in sync (include-list mode only).
    /// An empty-string prefix matches everything.
    #[serde(default)]
    pub included_paths: IndexSet<String>,

    /// External directories mapped 1:1 onto top-level vault folders by
    /// basename.
    #[serde(default)]
    pub external_folders: Vec<PathBuf>,

    /// Sync participation mode.
    #[serde(default = "default_mode")]
    pub mode: SyncMode,

    /// Debounce for raw watch events, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Settle delay before the change guard releases, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Highlight color for synced folders. Cosmetic, read by the UI layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level filter.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_mode() -> SyncMode {
    SyncMode::AllExceptExcluded
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_settle_ms() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            external_root: None,
            sync_on_write: true,
            sync_interval_secs: 0,
            excluded_paths: IndexSet::new(),
            included_paths: IndexSet::new(),
            external_folders: Vec::new(),
            mode: default_mode(),
            debounce_ms: default_debounce_ms(),
            settle_ms: default_settle_ms(),
            highlight_color: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration for the given vault root from all sources.
    pub fn load(vault_root: &Path) -> Result<Self, Box<figment::Error>> {
        let config_path = Self::config_path(vault_root);

        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with VAULTSYNC_ prefix.
            // Double underscore separates nested levels.
            .merge(Env::prefixed("VAULTSYNC_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Path of the configuration file for a vault root.
    pub fn config_path(vault_root: &Path) -> PathBuf {
        vault_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Write the configuration back as TOML.
    pub fn save(&self, vault_root: &Path) -> std::io::Result<()> {
        let path = Self::config_path(vault_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, rendered)
    }
}

impl SyncConfig {
    /// Basenames of the configured external folders, in order.
    ///
    /// Two folders with the same basename break the path-mapping bijection;
    /// callers should warn when `has_basename_collision` reports true.
    pub fn folder_basenames(&self) -> Vec<&str> {
        self.external_folders
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect()
    }

    /// True if two external folders share a basename.
    pub fn has_basename_collision(&self) -> bool {
        let names = self.folder_basenames();
        let unique: std::collections::HashSet<&&str> = names.iter().collect();
        unique.len() != names.len()
    }
}
