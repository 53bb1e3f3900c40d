//! Serialized session types.
//!
//! The on-disk document is versioned, but decoding is tolerant in both
//! directions: every optional field defaults when missing, unknown fields are
//! ignored, and a single undecodable session is dropped instead of failing the
//! whole document (see `StoreData::from_json`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Running,
    WaitingInput,
    Stopped,
}

/// Why a session is waiting. Only meaningful while `WaitingInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitingReason {
    PermissionPrompt,
    Stop,
    Unknown,
}

impl WaitingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionPrompt => "permissionPrompt",
            Self::Stop => "stop",
            Self::Unknown => "unknown",
        }
    }
}

/// Display urgency derived from status + acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Urgency {
    /// Stopped sessions are not displayed.
    None,
    Green,
    Yellow,
    Red,
}

/// Builds the key a session is stored under: `sessionId:tty`, or the bare id
/// for sessions without a terminal device.
pub fn composite_id(session_id: &str, tty: Option<&str>) -> String {
    match tty.filter(|t| !t.is_empty()) {
        Some(tty) => format!("{}:{}", session_id, tty),
        None => session_id.to_string(),
    }
}

/// Strips trailing slashes (except for root "/") so "/project" and "/project/" compare equal.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_reason: Option<WaitingReason>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    // Provenance and focus hints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_term_program: Option<String>,
    #[serde(
        default,
        alias = "editorBundleID",
        skip_serializing_if = "Option::is_none"
    )]
    pub editor_bundle_id: Option<String>,
    #[serde(default, alias = "editorPID", skip_serializing_if = "Option::is_none")]
    pub editor_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_tab_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplexer_socket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplexer_pane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplexer_session: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,

    #[serde(default)]
    pub is_tool_running: bool,
    #[serde(default)]
    pub is_acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<u64>,
    #[serde(default)]
    pub is_disambiguated: bool,
}

impl Session {
    pub fn new(session_id: &str, cwd: &str, tty: Option<&str>, now: DateTime<Utc>) -> Self {
        Session {
            session_id: session_id.to_string(),
            cwd: cwd.to_string(),
            tty: tty.filter(|t| !t.is_empty()).map(str::to_string),
            status: SessionStatus::Running,
            waiting_reason: None,
            created_at: now,
            updated_at: now,
            term_program: None,
            actual_term_program: None,
            editor_bundle_id: None,
            editor_pid: None,
            learned_tab_index: None,
            multiplexer_socket: None,
            multiplexer_pane: None,
            multiplexer_session: None,
            tool_name: None,
            summary: None,
            last_event: None,
            is_tool_running: false,
            is_acknowledged: false,
            display_order: None,
            is_disambiguated: false,
        }
    }

    pub fn id(&self) -> String {
        composite_id(&self.session_id, self.tty.as_deref())
    }

    pub fn is_active(&self) -> bool {
        self.status != SessionStatus::Stopped
    }

    pub fn is_waiting(&self) -> bool {
        self.status == SessionStatus::WaitingInput
    }

    /// Last path component of the working directory.
    pub fn display_name(&self) -> String {
        let normalized = normalize_path(&self.cwd);
        normalized
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&normalized)
            .to_string()
    }

    /// Display name with the tty suffix when another active session shares the name.
    pub fn qualified_display_name(&self) -> String {
        let name = self.display_name();
        match (self.is_disambiguated, self.tty.as_deref()) {
            (true, Some(tty)) => {
                let short = tty.rsplit('/').next().unwrap_or(tty);
                format!("{} ({})", name, short)
            }
            (true, None) => format!("{} ({})", name, short_id(&self.session_id)),
            _ => name,
        }
    }

    pub fn urgency(&self) -> Urgency {
        match self.status {
            SessionStatus::Stopped => Urgency::None,
            SessionStatus::Running => Urgency::Green,
            SessionStatus::WaitingInput if self.is_acknowledged => Urgency::Green,
            SessionStatus::WaitingInput => match self.waiting_reason {
                Some(WaitingReason::PermissionPrompt) => Urgency::Red,
                _ => Urgency::Yellow,
            },
        }
    }

    pub fn is_editor_hosted(&self) -> bool {
        self.editor_bundle_id.is_some()
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
    }

    // State helpers used by the transition functions. They keep the
    // acknowledgment rules in one place: entering `running` clears it, a
    // change of waiting reason clears it, re-entering the same wait keeps it.

    pub(crate) fn enter_running(&mut self) {
        self.status = SessionStatus::Running;
        self.waiting_reason = None;
        self.is_acknowledged = false;
    }

    pub(crate) fn enter_waiting(&mut self, reason: WaitingReason) {
        let unchanged =
            self.status == SessionStatus::WaitingInput && self.waiting_reason == Some(reason);
        self.status = SessionStatus::WaitingInput;
        self.waiting_reason = Some(reason);
        self.is_tool_running = false;
        if !unchanged {
            self.is_acknowledged = false;
        }
    }

    pub(crate) fn enter_stopped(&mut self) {
        self.status = SessionStatus::Stopped;
        self.waiting_reason = None;
        self.is_tool_running = false;
    }
}

fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

impl Default for StoreData {
    fn default() -> Self {
        StoreData {
            version: STORE_VERSION,
            sessions: BTreeMap::new(),
            updated_at: None,
        }
    }
}

/// Loose shape used for tolerant decoding: sessions are decoded one at a time.
#[derive(Deserialize)]
struct RawStoreData {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    sessions: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl StoreData {
    /// Decodes a store document, dropping individual sessions that fail to decode.
    ///
    /// Returns an error only when the document itself is not a JSON object of
    /// the expected shape.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let raw: RawStoreData = serde_json::from_str(content)?;
        let version = raw.version.unwrap_or(STORE_VERSION);
        if version > STORE_VERSION {
            tracing::debug!(version, "Reading newer store version field-by-field");
        }

        let mut sessions = BTreeMap::new();
        for (key, value) in raw.sessions {
            match serde_json::from_value::<Session>(value) {
                Ok(session) => {
                    sessions.insert(key, session);
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Dropping undecodable session");
                }
            }
        }

        Ok(StoreData {
            version,
            sessions,
            updated_at: raw.updated_at,
        })
    }

    pub fn next_display_order(&self) -> u64 {
        self.sessions
            .values()
            .filter_map(|s| s.display_order)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Active sessions in display order.
    ///
    /// Excludes `stopped` sessions and, when `timeout_minutes > 0`, sessions
    /// idle longer than the timeout.
    pub fn active_sessions(&self, timeout_minutes: u64, now: DateTime<Utc>) -> Vec<Session> {
        let timeout = (timeout_minutes > 0).then(|| Duration::minutes(timeout_minutes as i64));
        let mut active: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .filter(|s| timeout.map_or(true, |limit| s.idle_for(now) <= limit))
            .cloned()
            .collect();
        sort_for_display(&mut active);
        active
    }

    /// Marks sessions whose display names collide with another active session.
    pub fn recompute_disambiguation(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for session in self.sessions.values().filter(|s| s.is_active()) {
            *counts.entry(session.display_name()).or_default() += 1;
        }
        for session in self.sessions.values_mut() {
            session.is_disambiguated =
                session.is_active() && counts.get(&session.display_name()).copied().unwrap_or(0) > 1;
        }
    }

    /// Removes stopped sessions older than `retain_hours`. 0 keeps them forever.
    pub fn prune_stopped(&mut self, retain_hours: u64, now: DateTime<Utc>) -> usize {
        if retain_hours == 0 {
            return 0;
        }
        let limit = Duration::hours(retain_hours as i64);
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.is_active() || s.idle_for(now) <= limit);
        before - self.sessions.len()
    }
}

/// Sorts by `displayOrder`, then `createdAt`, then id for a total order.
pub fn sort_for_display(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        a.display_order
            .unwrap_or(u64::MAX)
            .cmp(&b.display_order.unwrap_or(u64::MAX))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id().cmp(&b.id()))
    });
}
