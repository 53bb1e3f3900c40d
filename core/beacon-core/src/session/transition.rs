//! Maps hook and protocol events to session state.
//!
//! Both functions are total over (current status, event) and idempotent:
//! applying the same event twice leaves the status fields as applying it once.
//!
//! ```text
//! SessionStart               -> running (only from new/stopped)
//! UserPromptSubmit           -> running, clears ack + waiting reason
//! PreToolUse                 -> running + isToolRunning
//! PreToolUse (question tool) -> waitingInput/unknown
//! PostToolUse                -> isToolRunning=false; permission/question wait -> running
//! PermissionRequest          -> waitingInput/permissionPrompt
//! Notification permission    -> waitingInput/permissionPrompt
//! Notification idle_prompt   -> waitingInput/stop (a pending permission wins)
//! Notification other         -> no state change
//! Stop                       -> waitingInput/stop (a pending permission wins)
//! SessionEnd                 -> stopped
//! SubagentStop/PreCompact    -> no state change (metadata only)
//! ```
//!
//! A stopped session only comes back through `SessionStart` or
//! `UserPromptSubmit`; late tool events cannot resurrect it.

use beacon_protocol::{Attention, AttentionLevel, ProtocolEvent, ProtocolEventKind};
use chrono::{DateTime, Utc};

use super::event::{mentions_permission, HookEvent, NotificationKind};
use super::types::{Session, SessionStatus, WaitingReason};

pub fn apply_hook_event(session: &mut Session, event: &HookEvent, now: DateTime<Utc>) {
    session.updated_at = now;
    session.last_event = Some(event.name().to_string());

    if session.status == SessionStatus::Stopped
        && !matches!(event, HookEvent::SessionStart | HookEvent::UserPromptSubmit)
    {
        return;
    }

    match event {
        HookEvent::SessionStart => {
            if session.status == SessionStatus::Stopped {
                session.enter_running();
            }
        }

        HookEvent::UserPromptSubmit => session.enter_running(),

        HookEvent::PreToolUse {
            asks_question: true,
            ..
        } => session.enter_waiting(WaitingReason::Unknown),

        HookEvent::PreToolUse { .. } => {
            if session.status != SessionStatus::Running {
                session.enter_running();
            }
            session.is_tool_running = true;
        }

        HookEvent::PostToolUse { .. } => {
            session.is_tool_running = false;
            if matches!(
                session.waiting_reason,
                Some(WaitingReason::PermissionPrompt) | Some(WaitingReason::Unknown)
            ) {
                session.enter_running();
            }
        }

        HookEvent::PermissionRequest => session.enter_waiting(WaitingReason::PermissionPrompt),

        HookEvent::Notification { kind } => match kind {
            NotificationKind::Permission => session.enter_waiting(WaitingReason::PermissionPrompt),
            NotificationKind::Idle => wait_unless_permission_pending(session),
            NotificationKind::Other => {}
        },

        HookEvent::Stop => wait_unless_permission_pending(session),

        HookEvent::SessionEnd => session.enter_stopped(),

        HookEvent::SubagentStop | HookEvent::PreCompact => {}

        HookEvent::Unknown { event_name } => {
            tracing::debug!(event_name = %event_name, "Unhandled hook event");
        }
    }
}

/// Turn completion. A permission prompt raised during the turn outranks it.
fn wait_unless_permission_pending(session: &mut Session) {
    if session.is_waiting() && session.waiting_reason == Some(WaitingReason::PermissionPrompt) {
        session.is_tool_running = false;
    } else {
        session.enter_waiting(WaitingReason::Stop);
    }
}

pub fn apply_protocol_event(session: &mut Session, event: &ProtocolEvent, now: DateTime<Utc>) {
    session.updated_at = now;
    session.last_event = Some(protocol_event_name(event.event).to_string());
    session.tool_name = Some(event.tool.name.clone());
    if let Some(summary) = event.summary.as_ref().filter(|s| !s.trim().is_empty()) {
        session.summary = Some(summary.clone());
    }

    match event.event {
        ProtocolEventKind::SessionStart | ProtocolEventKind::SessionRunning => {
            if session.status != SessionStatus::Running {
                session.enter_running();
            }
        }
        ProtocolEventKind::SessionWaiting => {
            session.enter_waiting(waiting_reason_for(&event.attention));
        }
        ProtocolEventKind::SessionStop => session.enter_stopped(),
        ProtocolEventKind::ArtifactLink => {}
    }
}

/// Derives a waiting reason from a protocol attention block.
pub fn waiting_reason_for(attention: &Attention) -> WaitingReason {
    if attention.reason.as_deref().is_some_and(mentions_permission) {
        return WaitingReason::PermissionPrompt;
    }
    match attention.level {
        AttentionLevel::Red => WaitingReason::PermissionPrompt,
        AttentionLevel::Yellow => WaitingReason::Stop,
        AttentionLevel::Green | AttentionLevel::None => WaitingReason::Unknown,
    }
}

fn protocol_event_name(kind: ProtocolEventKind) -> &'static str {
    match kind {
        ProtocolEventKind::SessionStart => "session.start",
        ProtocolEventKind::SessionStop => "session.stop",
        ProtocolEventKind::SessionWaiting => "session.waiting",
        ProtocolEventKind::SessionRunning => "session.running",
        ProtocolEventKind::ArtifactLink => "artifact.link",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::ToolInfo;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_000_000 + secs, 0).unwrap()
    }

    fn make_session() -> Session {
        Session::new("s1", "/work/app", Some("/dev/ttys001"), at(0))
    }

    fn pre_tool() -> HookEvent {
        HookEvent::PreToolUse {
            tool_name: Some("Bash".to_string()),
            asks_question: false,
        }
    }

    fn post_tool() -> HookEvent {
        HookEvent::PostToolUse {
            tool_name: Some("Bash".to_string()),
        }
    }

    fn apply_all(session: &mut Session, events: &[HookEvent]) {
        for (i, event) in events.iter().enumerate() {
            apply_hook_event(session, event, at(i as i64 + 1));
        }
    }

    fn status_fields(s: &Session) -> (SessionStatus, Option<WaitingReason>, bool, bool) {
        (s.status, s.waiting_reason, s.is_tool_running, s.is_acknowledged)
    }

    fn protocol(kind: ProtocolEventKind, level: AttentionLevel, reason: Option<&str>) -> ProtocolEvent {
        ProtocolEvent {
            proto: "beacon/1".to_string(),
            event: kind,
            session_id: "ext".to_string(),
            timestamp: at(0),
            tool: ToolInfo {
                name: "codex".to_string(),
                version: None,
            },
            cwd: "/work/app".to_string(),
            tty: None,
            attention: Attention {
                level,
                reason: reason.map(str::to_string),
            },
            summary: None,
        }
    }

    // ─── Scenario: a full turn ───────────────────────────────────────────

    #[test]
    fn test_turn_ends_waiting_for_input() {
        let mut s = make_session();
        apply_all(
            &mut s,
            &[HookEvent::SessionStart, pre_tool(), post_tool(), HookEvent::Stop],
        );
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::Stop));
        assert!(!s.is_tool_running);
        assert_eq!(s.last_event.as_deref(), Some("Stop"));
        assert_eq!(s.updated_at, at(4));
    }

    #[test]
    fn test_tool_flag_set_strictly_between_start_and_end() {
        let mut s = make_session();
        apply_hook_event(&mut s, &pre_tool(), at(1));
        assert!(s.is_tool_running);
        assert_eq!(s.status, SessionStatus::Running);
        apply_hook_event(&mut s, &post_tool(), at(2));
        assert!(!s.is_tool_running);
        assert_eq!(s.status, SessionStatus::Running);
    }

    // ─── Scenario: permission prompts ────────────────────────────────────

    #[test]
    fn test_permission_request_waits() {
        let mut s = make_session();
        apply_all(&mut s, &[pre_tool(), HookEvent::PermissionRequest]);
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::PermissionPrompt));
        assert!(!s.is_tool_running);
    }

    #[test]
    fn test_approved_tool_returns_to_running() {
        let mut s = make_session();
        apply_all(&mut s, &[pre_tool(), HookEvent::PermissionRequest, post_tool()]);
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.waiting_reason, None);
    }

    #[test]
    fn test_stop_does_not_downgrade_pending_permission() {
        let mut s = make_session();
        apply_all(
            &mut s,
            &[
                HookEvent::Notification {
                    kind: NotificationKind::Permission,
                },
                HookEvent::Stop,
            ],
        );
        assert_eq!(s.waiting_reason, Some(WaitingReason::PermissionPrompt));
    }

    #[test]
    fn test_idle_notification_waits_for_input() {
        let mut s = make_session();
        apply_hook_event(
            &mut s,
            &HookEvent::Notification {
                kind: NotificationKind::Idle,
            },
            at(1),
        );
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::Stop));
    }

    #[test]
    fn test_other_notification_leaves_state() {
        let mut s = make_session();
        apply_hook_event(&mut s, &pre_tool(), at(1));
        let before = status_fields(&s);
        apply_hook_event(
            &mut s,
            &HookEvent::Notification {
                kind: NotificationKind::Other,
            },
            at(2),
        );
        assert_eq!(status_fields(&s), before);
    }

    #[test]
    fn test_question_tool_waits_with_unknown_reason() {
        let mut s = make_session();
        apply_hook_event(
            &mut s,
            &HookEvent::PreToolUse {
                tool_name: Some("AskUserQuestion".to_string()),
                asks_question: true,
            },
            at(1),
        );
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::Unknown));
        apply_hook_event(&mut s, &post_tool(), at(2));
        assert_eq!(s.status, SessionStatus::Running);
    }

    // ─── Scenario: acknowledgment ────────────────────────────────────────

    #[test]
    fn test_user_prompt_clears_acknowledgment() {
        let mut s = make_session();
        apply_hook_event(&mut s, &HookEvent::Stop, at(1));
        s.is_acknowledged = true;
        apply_hook_event(&mut s, &HookEvent::UserPromptSubmit, at(2));
        assert_eq!(s.status, SessionStatus::Running);
        assert!(!s.is_acknowledged);
        assert_eq!(s.waiting_reason, None);
    }

    #[test]
    fn test_repeated_stop_keeps_acknowledgment() {
        let mut s = make_session();
        apply_hook_event(&mut s, &HookEvent::Stop, at(1));
        s.is_acknowledged = true;
        apply_hook_event(&mut s, &HookEvent::Stop, at(2));
        assert!(s.is_acknowledged);
    }

    // ─── Scenario: lifecycle ─────────────────────────────────────────────

    #[test]
    fn test_session_end_stops_and_clears_tool_flag() {
        let mut s = make_session();
        apply_all(&mut s, &[pre_tool(), HookEvent::SessionEnd]);
        assert_eq!(s.status, SessionStatus::Stopped);
        assert!(!s.is_tool_running);
    }

    #[test]
    fn test_late_tool_event_does_not_resurrect() {
        let mut s = make_session();
        apply_all(&mut s, &[HookEvent::SessionEnd, post_tool(), HookEvent::Stop]);
        assert_eq!(s.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_session_start_revives_stopped_but_not_waiting() {
        let mut s = make_session();
        apply_all(&mut s, &[HookEvent::SessionEnd, HookEvent::SessionStart]);
        assert_eq!(s.status, SessionStatus::Running);

        let mut waiting = make_session();
        apply_all(&mut waiting, &[HookEvent::Stop, HookEvent::SessionStart]);
        assert_eq!(waiting.status, SessionStatus::WaitingInput);
    }

    #[test]
    fn test_metadata_only_events() {
        let mut s = make_session();
        apply_hook_event(&mut s, &HookEvent::Stop, at(1));
        let before = status_fields(&s);
        for event in [
            HookEvent::SubagentStop,
            HookEvent::PreCompact,
            HookEvent::Unknown {
                event_name: "Future".to_string(),
            },
        ] {
            apply_hook_event(&mut s, &event, at(5));
            assert_eq!(status_fields(&s), before);
        }
        assert_eq!(s.last_event.as_deref(), Some("Future"));
    }

    #[test]
    fn test_every_event_is_idempotent() {
        let events = [
            HookEvent::SessionStart,
            HookEvent::UserPromptSubmit,
            pre_tool(),
            post_tool(),
            HookEvent::PermissionRequest,
            HookEvent::Notification {
                kind: NotificationKind::Permission,
            },
            HookEvent::Notification {
                kind: NotificationKind::Idle,
            },
            HookEvent::Stop,
            HookEvent::SessionEnd,
        ];
        let starts = [SessionStatus::Running, SessionStatus::WaitingInput, SessionStatus::Stopped];

        for start in starts {
            for event in &events {
                let mut s = make_session();
                match start {
                    SessionStatus::WaitingInput => s.enter_waiting(WaitingReason::Stop),
                    SessionStatus::Stopped => s.enter_stopped(),
                    SessionStatus::Running => {}
                }
                s.is_acknowledged = start == SessionStatus::WaitingInput;

                apply_hook_event(&mut s, event, at(1));
                let once = status_fields(&s);
                apply_hook_event(&mut s, event, at(2));
                assert_eq!(status_fields(&s), once, "{:?} from {:?}", event, start);
            }
        }
    }

    // ─── Scenario: protocol events ───────────────────────────────────────

    #[test]
    fn test_protocol_waiting_reason_from_attention() {
        let red = Attention {
            level: AttentionLevel::Red,
            reason: None,
        };
        let yellow = Attention {
            level: AttentionLevel::Yellow,
            reason: None,
        };
        let worded = Attention {
            level: AttentionLevel::None,
            reason: Some("needs permission to write".to_string()),
        };
        assert_eq!(waiting_reason_for(&red), WaitingReason::PermissionPrompt);
        assert_eq!(waiting_reason_for(&yellow), WaitingReason::Stop);
        assert_eq!(waiting_reason_for(&worded), WaitingReason::PermissionPrompt);
        assert_eq!(waiting_reason_for(&Attention::default()), WaitingReason::Unknown);
    }

    #[test]
    fn test_protocol_lifecycle() {
        let mut s = make_session();
        apply_protocol_event(
            &mut s,
            &protocol(ProtocolEventKind::SessionWaiting, AttentionLevel::Red, None),
            at(1),
        );
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::PermissionPrompt));
        assert_eq!(s.tool_name.as_deref(), Some("codex"));

        let link = protocol(ProtocolEventKind::ArtifactLink, AttentionLevel::None, None);
        apply_protocol_event(&mut s, &link, at(2));
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.last_event.as_deref(), Some("artifact.link"));

        apply_protocol_event(
            &mut s,
            &protocol(ProtocolEventKind::SessionRunning, AttentionLevel::Green, None),
            at(3),
        );
        assert_eq!(s.status, SessionStatus::Running);

        apply_protocol_event(
            &mut s,
            &protocol(ProtocolEventKind::SessionStop, AttentionLevel::None, None),
            at(4),
        );
        assert_eq!(s.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_protocol_summary_recorded() {
        let mut s = make_session();
        let mut event = protocol(ProtocolEventKind::SessionRunning, AttentionLevel::Green, None);
        event.summary = Some("Refactoring parser".to_string());
        apply_protocol_event(&mut s, &event, at(1));
        assert_eq!(s.summary.as_deref(), Some("Refactoring parser"));
    }
}
