//! Error types for beacon-core operations.
//!
//! Store corruption is deliberately absent: a corrupt state file is logged and
//! replaced with an empty store rather than surfaced (see `session::store`).

use std::path::PathBuf;

/// All errors that can occur in beacon-core operations.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Beacon home directory could not be determined")]
    HomeNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock state file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Probe Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Probe failed: {probe}: {details}")]
    ProbeFailure { probe: String, details: String },

    #[error("Probe timed out after {timeout_ms}ms: {probe}")]
    ProbeTimeout { probe: String, timeout_ms: u64 },
}

impl BeaconError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn probe(probe: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ProbeFailure {
            probe: probe.into(),
            details: details.into(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProbeFailure { .. } | Self::ProbeTimeout { .. })
    }
}

/// Convenience type alias for Results using BeaconError.
pub type Result<T> = std::result::Result<T, BeaconError>;
