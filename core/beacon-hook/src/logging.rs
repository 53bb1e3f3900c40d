//! File logging for the hook.
//!
//! `BEACON_DEBUG_LOG=1` raises the level to debug; `RUST_LOG` is honoured
//! otherwise. If the log directory is unusable the hook runs silently.

use beacon_core::config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "beacon-hook.log";

/// Returns a guard that must live until exit so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let base = config::beacon_dir().ok()?;
    let dir = config::log_dir(&base);
    fs_err::create_dir_all(&dir).ok()?;

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = std::env::var("BEACON_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}
