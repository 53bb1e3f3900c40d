//! Agent hook handler.
//!
//! Reads the hook payload from stdin, fills in where the session lives
//! (tty, terminal, editor, tmux) from this process's environment, and
//! applies the event to the store.
//!
//! ## State Machine
//!
//! ```text
//! SessionStart / UserPromptSubmit → running   (revives stopped sessions)
//! PreToolUse                      → running + tool flag
//!                                   (waiting/unknown for questions)
//! PostToolUse                     → clears tool flag
//! PermissionRequest               → waiting (permissionPrompt)
//! Notification                    → classified: permission / idle / other
//! Stop                            → waiting (stop) unless permission pending
//! SessionEnd                      → stopped
//! ```

use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use beacon_core::config::{self, BeaconConfig};
use beacon_core::environment::provenance::{EnvSnapshot, Provenance};
use beacon_core::process::parent_pid;
use beacon_core::{HookInput, Session, SessionStore};
use chrono::Utc;

use crate::error::{HookError, Result};

/// Set on agent subprocesses spawned by Beacon itself (e.g. summaries).
const SKIP_ENV: &str = "BEACON_SKIP_HOOK";

pub fn run() -> Result<()> {
    if std::env::var(SKIP_ENV)
        .map(|v| v == "1")
        .unwrap_or(false)
    {
        let _ = io::stdin().read_to_end(&mut Vec::new());
        return Ok(());
    }

    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(HookError::Stdin)?;
    if raw.trim().is_empty() {
        return Ok(());
    }

    let base = config::beacon_dir()?;
    let cfg = BeaconConfig::load(&base);
    let timeout = Duration::from_millis(cfg.environment.probe_timeout_ms);
    let agent_pid = parent_pid().unwrap_or_else(std::process::id);
    let provenance = Provenance::capture(&EnvSnapshot::from_env(), agent_pid, timeout);

    handle_input(&raw, &base, &cfg, &provenance).map(|_| ())
}

pub(crate) fn handle_input(
    raw: &str,
    base: &Path,
    cfg: &BeaconConfig,
    provenance: &Provenance,
) -> Result<Option<Session>> {
    let mut input: HookInput = serde_json::from_str(raw)
        .map_err(|e| HookError::Malformed(format!("hook input: {}", e)))?;
    provenance.fill_missing(&mut input);

    let store = SessionStore::open(&config::store_path(base), cfg.store.clone());
    let session = store.update(&input)?;

    match &session {
        Some(session) => {
            touch_heartbeat(base);
            tracing::debug!(
                event = ?input.hook_event_name,
                session = %session.id(),
                status = ?session.status,
                "Recorded hook event"
            );
        }
        None => tracing::debug!(
            event = ?input.hook_event_name,
            session = ?input.session_id,
            "Skipped hook event"
        ),
    }
    Ok(session)
}

fn touch_heartbeat(base: &Path) {
    use fs_err::OpenOptions;
    use std::io::Write as _;

    let _ = fs_err::create_dir_all(base);
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(config::heartbeat_path(base))
    {
        let _ = writeln!(file, "{}", Utc::now().timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{SessionStatus, WaitingReason};
    use tempfile::tempdir;

    fn provenance() -> Provenance {
        Provenance {
            tty: Some("/dev/ttys001".to_string()),
            term_program: Some("iTerm.app".to_string()),
            ..Default::default()
        }
    }

    fn handle(base: &Path, raw: &str) -> Result<Option<Session>> {
        handle_input(raw, base, &BeaconConfig::default(), &provenance())
    }

    #[test]
    fn test_turn_sequence_ends_waiting_for_stop() {
        let temp = tempdir().unwrap();
        for event in ["SessionStart", "PreToolUse", "PostToolUse", "Stop"] {
            let raw = format!(
                r#"{{"session_id": "s1", "cwd": "/work/app", "hook_event_name": "{}", "tool_name": "Bash"}}"#,
                event
            );
            handle(temp.path(), &raw).unwrap();
        }

        let store = SessionStore::open(&config::store_path(temp.path()), Default::default());
        let session = store.get("s1:/dev/ttys001").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::WaitingInput);
        assert_eq!(session.waiting_reason, Some(WaitingReason::Stop));
        assert!(!session.is_tool_running);
        assert_eq!(session.term_program.as_deref(), Some("iTerm.app"));
        assert!(config::heartbeat_path(temp.path()).exists());
    }

    #[test]
    fn test_permission_text_without_type() {
        let temp = tempdir().unwrap();
        handle(
            temp.path(),
            r#"{"session_id": "s1", "cwd": "/work/app", "hook_event_name": "Notification", "message": "Permission to run rm -rf?"}"#,
        )
        .unwrap();
        let store = SessionStore::open(&config::store_path(temp.path()), Default::default());
        let session = store.get("s1:/dev/ttys001").unwrap().unwrap();
        assert_eq!(session.waiting_reason, Some(WaitingReason::PermissionPrompt));
    }

    #[test]
    fn test_payload_tty_beats_captured_tty() {
        let temp = tempdir().unwrap();
        let session = handle(
            temp.path(),
            r#"{"session_id": "s1", "cwd": "/work/app", "tty": "/dev/ttys009", "hook_event_name": "SessionStart"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(session.id(), "s1:/dev/ttys009");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let temp = tempdir().unwrap();
        let err = handle(temp.path(), "{not json").unwrap_err();
        assert!(matches!(err, HookError::Malformed(_)));
        assert!(!config::store_path(temp.path()).exists());
    }

    #[test]
    fn test_missing_session_id_is_an_error() {
        let temp = tempdir().unwrap();
        let err = handle(temp.path(), r#"{"cwd": "/work/app", "hook_event_name": "Stop"}"#)
            .unwrap_err();
        assert!(matches!(err, HookError::Core(_)));
    }

    #[test]
    fn test_end_for_unknown_session_is_skipped() {
        let temp = tempdir().unwrap();
        let result = handle(
            temp.path(),
            r#"{"session_id": "ghost", "cwd": "/work/app", "hook_event_name": "SessionEnd"}"#,
        )
        .unwrap();
        assert!(result.is_none());
        assert!(!config::heartbeat_path(temp.path()).exists());
    }
}
