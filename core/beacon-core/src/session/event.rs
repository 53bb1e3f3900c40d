//! Hook input parsing and event classification.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Free-text fallback used when a notification carries no structured type.
static PERMISSION_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission").expect("permission regex is valid")
});

/// Structured notification types that mean "the agent needs approval".
const PERMISSION_TYPES: &[&str] = &["permission_prompt", "elicitation_dialog"];
const IDLE_TYPE: &str = "idle_prompt";
/// Tool that asks the user a question and blocks until it is answered.
const QUESTION_TOOL: &str = "AskUserQuestion";

/// JSON payload a coding agent hands to `beacon-hook handle` on stdin.
///
/// Provenance fields are normally absent in the agent's payload and are
/// filled in by the hook from its own environment before the store sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub term_program: Option<String>,
    #[serde(default)]
    pub actual_term_program: Option<String>,
    #[serde(default, alias = "editor_bundle_identifier")]
    pub editor_bundle_id: Option<String>,
    #[serde(default)]
    pub editor_pid: Option<u32>,
    #[serde(default)]
    pub multiplexer_socket: Option<String>,
    #[serde(default)]
    pub multiplexer_pane: Option<String>,
    #[serde(default)]
    pub multiplexer_session: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Permission,
    Idle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit,
    PreToolUse {
        tool_name: Option<String>,
        asks_question: bool,
    },
    PostToolUse { tool_name: Option<String> },
    PermissionRequest,
    Notification { kind: NotificationKind },
    Stop,
    SubagentStop,
    PreCompact,
    SessionEnd,
    Unknown { event_name: String },
}

impl HookEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse { .. } => "PreToolUse",
            Self::PostToolUse { .. } => "PostToolUse",
            Self::PermissionRequest => "PermissionRequest",
            Self::Notification { .. } => "Notification",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::SessionEnd => "SessionEnd",
            Self::Unknown { event_name } => event_name,
        }
    }
}

impl HookInput {
    /// Returns `None` when the payload names no event at all.
    pub fn to_event(&self) -> Option<HookEvent> {
        let name = self.hook_event_name.as_deref()?;
        let event = match name {
            "SessionStart" => HookEvent::SessionStart,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "PreToolUse" => HookEvent::PreToolUse {
                tool_name: self.tool_name.clone(),
                asks_question: self.asks_question(),
            },
            "PostToolUse" => HookEvent::PostToolUse {
                tool_name: self.tool_name.clone(),
            },
            "PermissionRequest" => HookEvent::PermissionRequest,
            "Notification" => HookEvent::Notification {
                kind: classify_notification(
                    self.notification_type.as_deref(),
                    self.message.as_deref(),
                ),
            },
            "Stop" => HookEvent::Stop,
            "SubagentStop" => HookEvent::SubagentStop,
            "PreCompact" => HookEvent::PreCompact,
            "SessionEnd" => HookEvent::SessionEnd,
            other => HookEvent::Unknown {
                event_name: other.to_string(),
            },
        };
        Some(event)
    }

    /// Whether this tool invocation blocks on a question to the user.
    pub fn asks_question(&self) -> bool {
        self.question.as_deref().is_some_and(|q| !q.trim().is_empty())
            || self.tool_name.as_deref() == Some(QUESTION_TOOL)
    }
}

/// Classifies a notification. The structured type wins whenever present;
/// the message is only consulted when the type is missing.
pub fn classify_notification(
    notification_type: Option<&str>,
    message: Option<&str>,
) -> NotificationKind {
    match notification_type.filter(|t| !t.is_empty()) {
        Some(t) if PERMISSION_TYPES.contains(&t) => NotificationKind::Permission,
        Some(IDLE_TYPE) => NotificationKind::Idle,
        Some(_) => NotificationKind::Other,
        None => match message {
            Some(text) if PERMISSION_MESSAGE.is_match(text) => NotificationKind::Permission,
            _ => NotificationKind::Other,
        },
    }
}

/// Whether a free-text reason mentions a permission request.
pub fn mentions_permission(text: &str) -> bool {
    PERMISSION_MESSAGE.is_match(text)
}
