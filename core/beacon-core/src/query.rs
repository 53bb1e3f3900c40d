//! Read-only query surface: paged lists, text rendering and focus selectors.

use std::fmt::Write as _;

use beacon_protocol::{ItemStatus, SessionItem, SessionList};

use crate::session::{Session, SessionStatus};

pub fn session_item(session: &Session) -> SessionItem {
    let waiting = session.is_waiting();
    SessionItem {
        id: session.id(),
        name: session.qualified_display_name(),
        status: match session.status {
            SessionStatus::Running => ItemStatus::Running,
            SessionStatus::WaitingInput => ItemStatus::WaitingInput,
            SessionStatus::Stopped => ItemStatus::Stopped,
        },
        path: session.cwd.clone(),
        waiting_reason: session
            .waiting_reason
            .filter(|_| waiting)
            .map(|r| r.as_str().to_string()),
        is_acknowledged: waiting.then_some(session.is_acknowledged),
        tool: session.tool_name.clone(),
        tty: session.tty.clone(),
    }
}

/// Pages an already-ordered session list. `limit: None` returns the rest.
pub fn list_sessions(sessions: &[Session], offset: usize, limit: Option<usize>) -> SessionList {
    let page = sessions
        .iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(session_item)
        .collect();
    SessionList {
        sessions: page,
        offset,
        total: sessions.len(),
    }
}

pub fn render_text(list: &SessionList) -> String {
    if list.sessions.is_empty() {
        return "No active sessions\n".to_string();
    }
    let mut out = String::new();
    for (i, item) in list.sessions.iter().enumerate() {
        let mut status = item.status.as_str().to_string();
        if let Some(reason) = &item.waiting_reason {
            status.push_str(&format!(" ({})", reason));
        }
        if item.is_acknowledged == Some(true) {
            status.push_str(" [ack]");
        }
        let _ = writeln!(
            out,
            "{:>3}  {:<24} {:<32} {}",
            list.offset + i,
            item.name,
            status,
            item.path
        );
    }
    if list.offset + list.sessions.len() < list.total {
        let _ = writeln!(out, "... {} of {} shown", list.sessions.len(), list.total);
    }
    out
}

/// How the CLI picks a session to focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Zero-based position in the displayed list.
    Index(usize),
    /// Composite id, or a bare session id that names exactly one session.
    Id(String),
    /// Red before yellow; most recently updated wins ties.
    HighestPriorityWaiting,
}

impl Selector {
    pub fn select<'a>(&self, sessions: &'a [Session]) -> Option<&'a Session> {
        match self {
            Selector::Index(index) => sessions.get(*index),
            Selector::Id(id) => {
                if let Some(exact) = sessions.iter().find(|s| s.id() == *id) {
                    return Some(exact);
                }
                let mut bare = sessions.iter().filter(|s| s.session_id == *id);
                match (bare.next(), bare.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }
            Selector::HighestPriorityWaiting => sessions
                .iter()
                .filter(|s| s.is_waiting())
                .max_by(|a, b| {
                    a.urgency()
                        .cmp(&b.urgency())
                        .then_with(|| a.updated_at.cmp(&b.updated_at))
                }),
        }
    }
}
