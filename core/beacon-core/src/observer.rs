//! Long-lived view over the store.
//!
//! The observer turns store snapshots into an ordered active-session list
//! plus attention counts, and keeps that view honest:
//!
//! - **Staleness sweep**: sessions whose terminal device vanished or whose
//!   editor process died (or was recycled) are marked stopped in the store.
//! - **Acknowledgments**: an in-memory set layered over the persisted flag,
//!   carried forward when a new session takes over a terminal.
//! - **Coalescing**: triggers arriving during a refresh fold into one more pass.
//!
//! The watch loop reacts to filesystem notifications on the store directory
//! with a fixed-interval timer as fallback.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use beacon_protocol::PushEvent;
use chrono::{DateTime, Utc};
use notify::{RecursiveMode, Watcher};
use serde::Serialize;

use crate::environment::EditorKind;
use crate::error::{BeaconError, Result};
use crate::external::EXTERNAL_ID_PREFIX;
use crate::process::{is_pid_alive, process_info};
use crate::query::session_item;
use crate::session::{sort_for_display, Session, SessionStore, Urgency};

/// Decides whether a session's host still exists.
pub trait LivenessProbe {
    fn is_alive(&self, session: &Session) -> bool;
}

/// Checks device nodes and editor processes on this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLiveness;

impl LivenessProbe for SystemLiveness {
    fn is_alive(&self, session: &Session) -> bool {
        if let (Some(bundle_id), Some(pid)) = (&session.editor_bundle_id, session.editor_pid) {
            if !is_pid_alive(pid) {
                return false;
            }
            let tokens = EditorKind::from_bundle_id(bundle_id).identity_tokens();
            return tokens.is_empty()
                || process_info(pid).is_some_and(|info| info.matches_any(tokens));
        }
        match session.tty.as_deref() {
            Some(tty) => Path::new(tty).exists(),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub unacknowledged_red: usize,
    pub unacknowledged_yellow: usize,
    /// Running plus acknowledged waiting.
    pub displayed_green: usize,
    pub total: usize,
}

impl SessionCounts {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let mut counts = SessionCounts {
            total: sessions.len(),
            ..Default::default()
        };
        for session in sessions {
            match session.urgency() {
                Urgency::Red => counts.unacknowledged_red += 1,
                Urgency::Yellow => counts.unacknowledged_yellow += 1,
                Urgency::Green => counts.displayed_green += 1,
                Urgency::None => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub sessions: Vec<Session>,
    pub counts: SessionCounts,
    pub refreshed_at: DateTime<Utc>,
}

impl SessionView {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            sessions: Vec::new(),
            counts: SessionCounts::default(),
            refreshed_at: now,
        }
    }
}

/// Resets the in-flight flag even if a refresh errors out.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionObserver<L: LivenessProbe = SystemLiveness> {
    store: SessionStore,
    liveness: L,
    acknowledged: Mutex<HashSet<String>>,
    tty_owners: Mutex<HashMap<String, String>>,
    external: Mutex<Vec<Session>>,
    latest: Mutex<Option<SessionView>>,
    in_flight: AtomicBool,
    pending: AtomicBool,
}

impl SessionObserver<SystemLiveness> {
    pub fn new(store: SessionStore) -> Self {
        Self::with_liveness(store, SystemLiveness)
    }
}

impl<L: LivenessProbe> SessionObserver<L> {
    pub fn with_liveness(store: SessionStore, liveness: L) -> Self {
        Self {
            store,
            liveness,
            acknowledged: Mutex::new(HashSet::new()),
            tty_owners: Mutex::new(HashMap::new()),
            external: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Replaces the projected external-agent sessions merged into each view.
    pub fn set_external(&self, sessions: Vec<Session>) {
        if let Ok(mut external) = self.external.lock() {
            *external = sessions;
        }
    }

    /// Marks a session acknowledged. Store-backed sessions are persisted;
    /// external ones only live in memory.
    pub fn acknowledge(&self, id: &str) -> Result<()> {
        if !id.starts_with(EXTERNAL_ID_PREFIX) {
            match self.store.acknowledge(id) {
                Ok(_) | Err(BeaconError::SessionNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Ok(mut acknowledged) = self.acknowledged.lock() {
            acknowledged.insert(id.to_string());
        }
        Ok(())
    }

    pub fn latest(&self) -> Option<SessionView> {
        self.latest.lock().ok().and_then(|view| view.clone())
    }

    /// Refreshes the view. Returns `None` when another refresh was already
    /// running; that refresh picks up this trigger before it finishes.
    pub fn refresh(&self) -> Result<Option<SessionView>> {
        self.refresh_at_with(Utc::now)
    }

    fn refresh_at_with(&self, now: impl Fn() -> DateTime<Utc>) -> Result<Option<SessionView>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
            return Ok(None);
        }
        let _guard = InFlight(&self.in_flight);

        loop {
            self.pending.store(false, Ordering::Release);
            let view = self.build_view(now())?;
            if !self.pending.swap(false, Ordering::AcqRel) {
                if let Ok(mut latest) = self.latest.lock() {
                    *latest = Some(view.clone());
                }
                return Ok(Some(view));
            }
            tracing::debug!("Coalesced refresh trigger, refreshing again");
        }
    }

    pub fn refresh_at(&self, now: DateTime<Utc>) -> Result<Option<SessionView>> {
        self.refresh_at_with(|| now)
    }

    fn build_view(&self, now: DateTime<Utc>) -> Result<SessionView> {
        let mut sessions = self.store.active_sessions(now)?;

        sessions.retain(|session| {
            if self.liveness.is_alive(session) {
                return true;
            }
            let id = session.id();
            tracing::info!(session = %id, "Host gone, marking session stopped");
            if let Err(err) = self.store.mark_stopped(&id) {
                tracing::warn!(session = %id, error = %err, "Failed to mark stale session");
            }
            false
        });

        if let Ok(external) = self.external.lock() {
            sessions.extend(external.iter().cloned());
        }

        self.apply_acknowledgments(&mut sessions);
        sort_for_display(&mut sessions);

        Ok(SessionView {
            counts: SessionCounts::from_sessions(&sessions),
            sessions,
            refreshed_at: now,
        })
    }

    /// Merges the in-memory ack set into the view. Entries for sessions that
    /// left the waiting state are dropped; a session that takes over a
    /// terminal inherits its predecessor's acknowledgment while waiting.
    fn apply_acknowledgments(&self, sessions: &mut [Session]) {
        let (Ok(mut acknowledged), Ok(mut owners)) =
            (self.acknowledged.lock(), self.tty_owners.lock())
        else {
            return;
        };

        for session in sessions.iter() {
            let Some(tty) = session.tty.clone() else {
                continue;
            };
            let id = session.id();
            if let Some(previous) = owners.insert(tty, id.clone()) {
                if previous != id && acknowledged.remove(&previous) && session.is_waiting() {
                    tracing::debug!(from = %previous, to = %id, "Carried acknowledgment across tty");
                    acknowledged.insert(id);
                }
            }
        }

        let present: HashSet<String> = sessions.iter().map(Session::id).collect();
        acknowledged.retain(|id| present.contains(id));

        for session in sessions.iter_mut() {
            let id = session.id();
            if !session.is_waiting() {
                acknowledged.remove(&id);
            } else if session.is_acknowledged {
                acknowledged.insert(id);
            } else if acknowledged.contains(&id) {
                session.is_acknowledged = true;
            }
        }
    }

    /// Watches the store directory and refreshes on change, falling back to
    /// `interval`. `tick` runs before every refresh; returning `Break` from
    /// `on_view` ends the loop.
    pub fn run(
        &self,
        interval: Duration,
        mut tick: impl FnMut(DateTime<Utc>),
        mut on_view: impl FnMut(&SessionView) -> ControlFlow<()>,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| BeaconError::io("creating store watcher", std::io::Error::other(e)))?;

        let dir = self
            .store
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Path::new(".").to_path_buf());
        fs_err::create_dir_all(&dir).map_err(|e| BeaconError::io("creating store directory", e))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| BeaconError::io("watching store directory", std::io::Error::other(e)))?;
        tracing::info!(dir = %dir.display(), interval_ms = interval.as_millis() as u64, "Observer started");

        loop {
            tick(Utc::now());
            match self.refresh() {
                Ok(Some(view)) => {
                    if on_view(&view).is_break() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "Refresh failed"),
            }

            match rx.recv_timeout(interval) {
                Ok(Err(err)) => tracing::debug!(error = %err, "Watcher error"),
                Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Store watcher disconnected");
                    return Ok(());
                }
            }
            // Debounce: one refresh for a burst of writes.
            while rx.try_recv().is_ok() {}
        }
    }
}

/// Push events turning `prev` into `next`.
pub fn diff_views(prev: &SessionView, next: &SessionView) -> Vec<PushEvent> {
    let before: HashMap<String, _> = prev
        .sessions
        .iter()
        .map(|s| (s.id(), session_item(s)))
        .collect();
    let mut events = Vec::new();
    let mut seen = HashSet::new();

    for session in &next.sessions {
        let item = session_item(session);
        seen.insert(item.id.clone());
        match before.get(&item.id) {
            None => events.push(PushEvent::SessionAdded { session: item }),
            Some(old) if *old != item => events.push(PushEvent::SessionUpdated { session: item }),
            Some(_) => {}
        }
    }
    for session in &prev.sessions {
        let id = session.id();
        if !seen.contains(&id) {
            events.push(PushEvent::SessionRemoved { id });
        }
    }
    events
}
