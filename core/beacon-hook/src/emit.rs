//! Protocol events from hookless tools.

use std::io::{self, Read};
use std::path::Path;

use beacon_core::config::{self, BeaconConfig};
use beacon_core::{Session, SessionStore};
use beacon_protocol::{parse_proto_tag, parse_protocol_event, PROTOCOL_NAME};

use crate::error::{HookError, Result};

pub fn run() -> Result<()> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(HookError::Stdin)?;
    if raw.trim().is_empty() {
        return Ok(());
    }

    let base = config::beacon_dir()?;
    let cfg = BeaconConfig::load(&base);
    emit_event(&raw, &base, &cfg).map(|_| ())
}

pub(crate) fn emit_event(raw: &str, base: &Path, cfg: &BeaconConfig) -> Result<Session> {
    let event = parse_protocol_event(raw.trim()).map_err(|e| HookError::Malformed(e.to_string()))?;

    if let Some((name, _)) = parse_proto_tag(&event.proto) {
        if name != PROTOCOL_NAME {
            tracing::warn!(proto = %event.proto, tool = %event.tool.name, "Foreign protocol name accepted");
        }
    }

    let store = SessionStore::open(&config::store_path(base), cfg.store.clone());
    let session = store.update_protocol(&event)?;
    tracing::debug!(
        event = ?event.event,
        session = %session.id(),
        status = ?session.status,
        "Recorded protocol event"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{SessionStatus, WaitingReason};
    use tempfile::tempdir;

    fn event(proto: &str, kind: &str, level: &str) -> String {
        format!(
            r#"{{"proto": "{}", "event": "{}", "session_id": "x1", "timestamp": "2026-01-27T10:00:00Z",
               "tool": {{"name": "codex"}}, "cwd": "/work/app", "attention": {{"level": "{}"}}}}"#,
            proto, kind, level
        )
    }

    #[test]
    fn test_waiting_red_is_permission_prompt() {
        let temp = tempdir().unwrap();
        let session = emit_event(
            &event("beacon/1", "session.waiting", "red"),
            temp.path(),
            &BeaconConfig::default(),
        )
        .unwrap();
        assert_eq!(session.status, SessionStatus::WaitingInput);
        assert_eq!(session.waiting_reason, Some(WaitingReason::PermissionPrompt));
        assert_eq!(session.tool_name.as_deref(), Some("codex"));
    }

    #[test]
    fn test_foreign_name_with_matching_version_is_accepted() {
        let temp = tempdir().unwrap();
        let session = emit_event(
            &event("acme/1", "session.start", "green"),
            temp.path(),
            &BeaconConfig::default(),
        )
        .unwrap();
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let temp = tempdir().unwrap();
        let err = emit_event(
            &event("beacon/2", "session.start", "green"),
            temp.path(),
            &BeaconConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HookError::Malformed(msg) if msg.contains("not supported")));
    }
}
