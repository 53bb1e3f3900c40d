//! Wire types shared by Beacon processes.
//!
//! This crate is shared by the hook binary, the observer, and companion tools
//! to prevent schema drift. It has no knowledge of how sessions are stored;
//! `beacon-core` maps its own types onto these shapes.
//!
//! Three families live here:
//!
//! - [`ProtocolEvent`]: the third-party event protocol (`beacon/1`) that
//!   hookless tools can emit to report session lifecycle.
//! - [`SessionList`] / [`SessionItem`]: the query surface (`beacon list --json`).
//! - [`PushEvent`]: incremental events handed to the push transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_NAME: &str = "beacon";
pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_EVENT_BYTES: usize = 64 * 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// Third-party event protocol
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEventKind {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.stop")]
    SessionStop,
    #[serde(rename = "session.waiting")]
    SessionWaiting,
    #[serde(rename = "session.running")]
    SessionRunning,
    #[serde(rename = "artifact.link")]
    ArtifactLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    Green,
    Yellow,
    Red,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attention {
    #[serde(default)]
    pub level: AttentionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A lifecycle event reported by a tool that has no hook integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    pub proto: String,
    pub event: ProtocolEventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool: ToolInfo,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default)]
    pub attention: Attention,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Splits a `proto` tag like `beacon/1` into its name and version.
pub fn parse_proto_tag(tag: &str) -> Option<(&str, u32)> {
    let (name, version) = tag.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    version.parse().ok().map(|v| (name, v))
}

/// Parses and validates a protocol event.
///
/// Any protocol name is accepted as long as the version matches; callers can
/// inspect `proto` to warn about foreign producers.
pub fn parse_protocol_event(input: &str) -> Result<ProtocolEvent, ErrorInfo> {
    if input.len() > MAX_EVENT_BYTES {
        return Err(ErrorInfo::new(
            "event_too_large",
            format!("event exceeds {} bytes", MAX_EVENT_BYTES),
        ));
    }

    let event: ProtocolEvent = serde_json::from_str(input)
        .map_err(|err| ErrorInfo::new("invalid_json", err.to_string()))?;

    match parse_proto_tag(&event.proto) {
        Some((_, PROTOCOL_VERSION)) => {}
        Some((_, version)) => {
            return Err(ErrorInfo::new(
                "unsupported_version",
                format!("protocol version {} is not supported", version),
            ))
        }
        None => {
            return Err(ErrorInfo::new(
                "invalid_proto",
                format!("malformed proto tag '{}'", event.proto),
            ))
        }
    }

    if event.session_id.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "session_id is empty"));
    }
    if event.cwd.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "cwd is empty"));
    }
    if event.tool.name.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "tool.name is empty"));
    }

    Ok(event)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Query surface
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Running,
    WaitingInput,
    Stopped,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingInput => "waitingInput",
            Self::Stopped => "stopped",
        }
    }
}

/// One session as exposed to consumers of the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionItem {
    pub id: String,
    pub name: String,
    pub status: ItemStatus,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_acknowledged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionItem>,
    pub offset: usize,
    pub total: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Push transport
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub version: String,
    pub platform: String,
}

/// Incremental events consumed by the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    #[serde(rename = "sessions.list")]
    SessionsList { sessions: Vec<SessionItem> },
    #[serde(rename = "session.added")]
    SessionAdded { session: SessionItem },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionItem },
    #[serde(rename = "session.removed")]
    SessionRemoved { id: String },
    #[serde(rename = "host_info")]
    HostInfo(HostInfo),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionsList { .. } => "sessions.list",
            Self::SessionAdded { .. } => "session.added",
            Self::SessionUpdated { .. } => "session.updated",
            Self::SessionRemoved { .. } => "session.removed",
            Self::HostInfo(_) => "host_info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_json() -> serde_json::Value {
        json!({
            "proto": "beacon/1",
            "event": "session.waiting",
            "session_id": "abc",
            "timestamp": "2026-01-27T10:00:00Z",
            "tool": {"name": "codex", "version": "0.9"},
            "cwd": "/work/app",
            "attention": {"level": "red", "reason": "permission"}
        })
    }

    #[test]
    fn test_parse_valid_event() {
        let event = parse_protocol_event(&event_json().to_string()).unwrap();
        assert_eq!(event.event, ProtocolEventKind::SessionWaiting);
        assert_eq!(event.attention.level, AttentionLevel::Red);
        assert_eq!(event.tool.version.as_deref(), Some("0.9"));
        assert!(event.tty.is_none());
    }

    #[test]
    fn test_missing_attention_defaults_to_none() {
        let mut value = event_json();
        value.as_object_mut().unwrap().remove("attention");
        let event = parse_protocol_event(&value.to_string()).unwrap();
        assert_eq!(event.attention.level, AttentionLevel::None);
        assert!(event.attention.reason.is_none());
    }

    #[test]
    fn test_rejects_unknown_event_name() {
        let mut value = event_json();
        value["event"] = json!("session.exploded");
        let err = parse_protocol_event(&value.to_string()).unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut value = event_json();
        value["proto"] = json!("beacon/2");
        let err = parse_protocol_event(&value.to_string()).unwrap_err();
        assert_eq!(err.code, "unsupported_version");
    }

    #[test]
    fn test_rejects_empty_session_id() {
        let mut value = event_json();
        value["session_id"] = json!("  ");
        let err = parse_protocol_event(&value.to_string()).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn test_proto_tag_parsing() {
        assert_eq!(parse_proto_tag("beacon/1"), Some(("beacon", 1)));
        assert_eq!(parse_proto_tag("other/1"), Some(("other", 1)));
        assert_eq!(parse_proto_tag("beacon"), None);
        assert_eq!(parse_proto_tag("/1"), None);
    }

    #[test]
    fn test_push_event_shape() {
        let event = PushEvent::SessionRemoved {
            id: "s1:/dev/ttys001".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session.removed");
        assert_eq!(value["data"]["id"], "s1:/dev/ttys001");
        assert_eq!(event.name(), "session.removed");
    }

    #[test]
    fn test_session_item_omits_absent_optionals() {
        let item = SessionItem {
            id: "s1".to_string(),
            name: "app".to_string(),
            status: ItemStatus::Running,
            path: "/work/app".to_string(),
            waiting_reason: None,
            is_acknowledged: None,
            tool: None,
            tty: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["status"], "running");
        assert!(value.get("waiting_reason").is_none());
        assert!(value.get("is_acknowledged").is_none());
    }
}
