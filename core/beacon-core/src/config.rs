//! Configuration loading and path resolution.
//!
//! Everything Beacon persists lives under `~/.beacon/` (or `$BEACON_HOME`):
//!
//! ```text
//! ~/.beacon/
//! ├── config.toml        # optional, see BeaconConfig
//! ├── sessions.json      # session store (SessionStore)
//! ├── sessions.json.lock # cross-process write lock
//! ├── hook-heartbeat     # touched by beacon-hook after each write
//! ├── status.sock        # external agent status datagrams
//! └── logs/
//! ```
//!
//! A missing or malformed config file yields defaults; a hook must never fail
//! because of configuration.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::environment::TerminalKind;
use crate::error::{BeaconError, Result};

pub const HOME_ENV: &str = "BEACON_HOME";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "sessions.json";
const HEARTBEAT_FILE: &str = "hook-heartbeat";
const STATUS_SOCKET: &str = "status.sock";
const LOG_DIR: &str = "logs";

/// Returns the Beacon data directory (`$BEACON_HOME` or `~/.beacon`).
pub fn beacon_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(".beacon"))
        .ok_or(BeaconError::HomeNotFound)
}

pub fn store_path(base: &Path) -> PathBuf {
    base.join(STORE_FILE)
}

pub fn config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE)
}

pub fn heartbeat_path(base: &Path) -> PathBuf {
    base.join(HEARTBEAT_FILE)
}

pub fn status_socket_path(base: &Path) -> PathBuf {
    base.join(STATUS_SOCKET)
}

pub fn log_dir(base: &Path) -> PathBuf {
    base.join(LOG_DIR)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sessions idle longer than this are hidden from the active view. 0 = never.
    pub session_timeout_minutes: u64,
    /// Stopped sessions older than this are physically removed on the next write.
    pub retain_stopped_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 0,
            retain_stopped_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Timer fallback for missed filesystem notifications.
    pub refresh_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Order in which live probes try terminal kinds.
    pub terminal_priority: Vec<TerminalKind>,
    pub probe_timeout_ms: u64,
    pub probe_cache_ttl_ms: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            terminal_priority: vec![
                TerminalKind::ITerm,
                TerminalKind::TerminalApp,
                TerminalKind::Ghostty,
                TerminalKind::Kitty,
                TerminalKind::WezTerm,
            ],
            probe_timeout_ms: 1_500,
            probe_cache_ttl_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    /// Process names (or argv fragments) identifying hookless agents.
    pub agent_names: Vec<String>,
    pub scan_interval_secs: u64,
    pub grace_secs: u64,
    pub retention_secs: u64,
    pub markers: PaneMarkers,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            agent_names: ["codex", "aider", "gemini", "opencode"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scan_interval_secs: 5,
            grace_secs: 10,
            retention_secs: 120,
            markers: PaneMarkers::default(),
        }
    }
}

/// Token sets used to recognise a permission prompt in a captured pane.
///
/// A snapshot counts as a permission prompt only when it contains at least one
/// token from EVERY group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaneMarkers {
    pub groups: Vec<Vec<String>>,
}

impl Default for PaneMarkers {
    fn default() -> Self {
        let group = |tokens: &[&str]| tokens.iter().map(|t| t.to_string()).collect();
        Self {
            groups: vec![
                group(&["Allow", "Do you want", "Approve", "Permission"]),
                group(&["Yes", "1."]),
                group(&["No", "2.", "Deny"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub store: StoreConfig,
    pub observer: ObserverConfig,
    pub focus: FocusConfig,
    pub environment: EnvironmentConfig,
    pub external: ExternalConfig,
}

impl BeaconConfig {
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| BeaconError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Loads `config.toml` from `base`, falling back to defaults.
    pub fn load(base: &Path) -> Self {
        let path = config_path(base);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read config; using defaults");
                return Self::default();
            }
        };

        match Self::parse(&path, &content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed config; using defaults");
                Self::default()
            }
        }
    }
}
