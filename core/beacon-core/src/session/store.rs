//! File-backed session store.
//!
//! Hooks, the observer and the CLI are separate processes that all write
//! `~/.beacon/sessions.json`. Every write goes through [`SessionStore::transact`]:
//!
//! 1. take the exclusive sidecar lock
//! 2. read the whole document (tolerantly)
//! 3. mutate in memory
//! 4. prune, recompute derived flags
//! 5. write a temp file in the same directory and rename it over the store
//!
//! Readers never lock: the rename makes every observed file complete.
//!
//! # Defensive Design
//!
//! - Missing or empty file: empty store
//! - Corrupt JSON: empty store, logged at warn (the next write replaces it)
//! - Undecodable individual sessions: dropped, the rest survive
//!
//! # TTY Migration
//!
//! At most one active session may occupy a TTY. When an event arrives for a
//! new session id on an occupied TTY, the previous occupant is retired to
//! `stopped`. If it was acknowledged while waiting and the newcomer is
//! waiting too, the acknowledgment carries forward.

use beacon_protocol::ProtocolEvent;
use chrono::{DateTime, Utc};
use fs_err as fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::event::{HookEvent, HookInput};
use super::lock::{lock_path_for, StoreLock};
use super::transition::{apply_hook_event, apply_protocol_event};
use super::types::{composite_id, sort_for_display, Session, StoreData, STORE_VERSION};
use crate::config::StoreConfig;
use crate::error::{BeaconError, Result};

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    lock_path: PathBuf,
    config: StoreConfig,
}

impl SessionStore {
    pub fn open(path: &Path, config: StoreConfig) -> Self {
        SessionStore {
            path: path.to_path_buf(),
            lock_path: lock_path_for(path),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Reads the current document without locking.
    pub fn load(&self) -> Result<StoreData> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreData::default())
            }
            Err(err) => return Err(BeaconError::io("reading session store", err)),
        };

        if content.trim().is_empty() {
            return Ok(StoreData::default());
        }

        match StoreData::from_json(&content) {
            Ok(data) => Ok(data),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Session store unreadable; starting from empty store"
                );
                Ok(StoreData::default())
            }
        }
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let content = serde_json::to_vec_pretty(data).map_err(|source| BeaconError::Json {
            context: "serializing session store".to_string(),
            source,
        })?;

        let parent_dir = self.parent_dir();
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| BeaconError::io("creating temp store file", e))?;
        temp_file
            .write_all(&content)
            .map_err(|e| BeaconError::io("writing temp store file", e))?;
        temp_file
            .flush()
            .map_err(|e| BeaconError::io("flushing temp store file", e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| BeaconError::io("replacing session store", e.error))?;
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// The single read-modify-write path. `f` sees the freshly loaded
    /// document while the cross-process lock is held.
    pub fn transact<T>(&self, f: impl FnOnce(&mut StoreData, DateTime<Utc>) -> T) -> Result<T> {
        self.transact_at(Utc::now(), f)
    }

    pub fn transact_at<T>(
        &self,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut StoreData, DateTime<Utc>) -> T,
    ) -> Result<T> {
        fs::create_dir_all(self.parent_dir())
            .map_err(|e| BeaconError::io("creating store directory", e))?;
        let _lock = StoreLock::acquire(&self.lock_path)?;

        let mut data = self.load()?;
        let output = f(&mut data, now);

        let pruned = data.prune_stopped(self.config.retain_stopped_hours, now);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned stopped sessions");
        }
        data.recompute_disambiguation();
        data.version = STORE_VERSION;
        data.updated_at = Some(now);

        self.save(&data)?;
        Ok(output)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event ingestion
    // ═══════════════════════════════════════════════════════════════════════

    /// Applies one hook event. Returns the updated session, or `None` when
    /// the event was skipped (no event name, or nothing to attach it to).
    pub fn update(&self, input: &HookInput) -> Result<Option<Session>> {
        self.update_at(input, Utc::now())
    }

    pub fn update_at(&self, input: &HookInput, now: DateTime<Utc>) -> Result<Option<Session>> {
        let Some(event) = input.to_event() else {
            return Ok(None);
        };
        let session_id = input
            .session_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| BeaconError::MalformedInput("missing session_id".to_string()))?;
        let tty = input.tty.as_deref().filter(|t| !t.is_empty());
        let cwd = input.cwd.as_deref().filter(|c| !c.is_empty());

        self.transact_at(now, |data, now| {
            let key = composite_id(session_id, tty);
            if !data.sessions.contains_key(&key) {
                if event == HookEvent::SessionEnd {
                    return None;
                }
                if cwd.is_none() {
                    tracing::debug!(
                        event = %event.name(),
                        session = %session_id,
                        "Skipping event (missing cwd)"
                    );
                    return None;
                }
            }

            let session = upsert(data, session_id, tty, cwd, now, |session| {
                merge_provenance(session, input);
                apply_hook_event(session, &event, now);
            });
            tracing::debug!(
                event = %event.name(),
                session = %session.id(),
                status = ?session.status,
                "Applied hook event"
            );
            Some(session)
        })
    }

    /// Applies one third-party protocol event (already validated).
    pub fn update_protocol(&self, event: &ProtocolEvent) -> Result<Session> {
        self.update_protocol_at(event, Utc::now())
    }

    pub fn update_protocol_at(&self, event: &ProtocolEvent, now: DateTime<Utc>) -> Result<Session> {
        let tty = event.tty.as_deref().filter(|t| !t.is_empty());
        self.transact_at(now, |data, now| {
            upsert(
                data,
                &event.session_id,
                tty,
                Some(&event.cwd),
                now,
                |session| apply_protocol_event(session, event, now),
            )
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Marks a waiting session as seen. Returns whether anything changed.
    pub fn acknowledge(&self, id: &str) -> Result<bool> {
        self.transact(|data, _| -> Result<bool> {
            let session = data
                .sessions
                .get_mut(id)
                .ok_or_else(|| BeaconError::SessionNotFound(id.to_string()))?;
            if !session.is_waiting() || session.is_acknowledged {
                return Ok(false);
            }
            session.is_acknowledged = true;
            Ok(true)
        })?
    }

    /// Retires a session. Unknown ids are ignored (the observer can race
    /// with pruning).
    pub fn mark_stopped(&self, id: &str) -> Result<bool> {
        self.transact(|data, now| match data.sessions.get_mut(id) {
            Some(session) if session.is_active() => {
                session.enter_stopped();
                session.updated_at = now;
                true
            }
            _ => false,
        })
    }

    pub fn update_learned_tab_index(&self, id: &str, index: u32) -> Result<()> {
        self.transact(|data, _| -> Result<()> {
            let session = data
                .sessions
                .get_mut(id)
                .ok_or_else(|| BeaconError::SessionNotFound(id.to_string()))?;
            session.learned_tab_index = Some(index);
            Ok(())
        })?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Every stored session (including stopped ones) in display order.
    pub fn snapshot(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.load()?.sessions.into_values().collect();
        sort_for_display(&mut sessions);
        Ok(sessions)
    }

    pub fn active_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        Ok(self
            .load()?
            .active_sessions(self.config.session_timeout_minutes, now))
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.load()?.sessions.remove(id))
    }
}

/// Finds or creates the session for (`session_id`, `tty`) and runs `apply`
/// on it. Only a session that is still active afterwards takes the TTY over
/// from its other active occupants.
fn upsert(
    data: &mut StoreData,
    session_id: &str,
    tty: Option<&str>,
    cwd: Option<&str>,
    now: DateTime<Utc>,
    apply: impl FnOnce(&mut Session),
) -> Session {
    let key = composite_id(session_id, tty);

    let next_order = data.next_display_order();
    let session = data.sessions.entry(key.clone()).or_insert_with(|| {
        let mut session = Session::new(session_id, cwd.unwrap_or_default(), tty, now);
        session.display_order = Some(next_order);
        session
    });

    if let Some(cwd) = cwd {
        session.cwd = cwd.to_string();
    }
    apply(session);
    let mut updated = session.clone();
    if !updated.is_active() {
        return updated;
    }

    let mut carried_ack = false;
    if let Some(tty) = tty {
        for (other_key, other) in data.sessions.iter_mut() {
            if *other_key == key || !other.is_active() || other.tty.as_deref() != Some(tty) {
                continue;
            }
            carried_ack |= other.is_waiting() && other.is_acknowledged;
            tracing::debug!(
                old = %other_key,
                new = %key,
                tty = %tty,
                "Retiring session after TTY migration"
            );
            other.enter_stopped();
            other.updated_at = now;
        }
    }

    if carried_ack && updated.is_waiting() {
        updated.is_acknowledged = true;
        if let Some(session) = data.sessions.get_mut(&key) {
            session.is_acknowledged = true;
        }
    }
    updated
}

/// Copies provenance captured at hook time. Absent fields never erase
/// what an earlier event recorded.
fn merge_provenance(session: &mut Session, input: &HookInput) {
    fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if value.is_some() {
            slot.clone_from(value);
        }
    }
    fill(&mut session.term_program, &input.term_program);
    fill(&mut session.actual_term_program, &input.actual_term_program);
    fill(&mut session.editor_bundle_id, &input.editor_bundle_id);
    fill(&mut session.editor_pid, &input.editor_pid);
    fill(&mut session.multiplexer_socket, &input.multiplexer_socket);
    fill(&mut session.multiplexer_pane, &input.multiplexer_pane);
    fill(&mut session.multiplexer_session, &input.multiplexer_session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionStatus, WaitingReason};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_000_000 + secs, 0).unwrap()
    }

    fn make_store(dir: &Path) -> SessionStore {
        SessionStore::open(&dir.join("sessions.json"), StoreConfig::default())
    }

    fn hook(session_id: &str, tty: Option<&str>, event: &str) -> HookInput {
        HookInput {
            session_id: Some(session_id.to_string()),
            cwd: Some("/work/app".to_string()),
            tty: tty.map(str::to_string),
            hook_event_name: Some(event.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_store_has_no_sessions() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_update_creates_session_with_display_order() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());

        let first = store
            .update_at(&hook("s1", Some("/dev/ttys001"), "SessionStart"), at(0))
            .unwrap()
            .unwrap();
        let second = store
            .update_at(&hook("s2", Some("/dev/ttys002"), "SessionStart"), at(1))
            .unwrap()
            .unwrap();

        assert_eq!(first.id(), "s1:/dev/ttys001");
        assert_eq!(first.display_order, Some(1));
        assert_eq!(second.display_order, Some(2));
        assert_eq!(first.status, SessionStatus::Running);
    }

    #[test]
    fn test_display_order_survives_reopen() {
        let temp = tempdir().unwrap();
        make_store(temp.path())
            .update_at(&hook("s1", Some("/dev/ttys001"), "SessionStart"), at(0))
            .unwrap();

        let reopened = make_store(temp.path());
        let session = reopened
            .update_at(&hook("s1", Some("/dev/ttys001"), "Stop"), at(5))
            .unwrap()
            .unwrap();
        assert_eq!(session.display_order, Some(1));
        assert_eq!(session.created_at, at(0));
    }

    #[test]
    fn test_missing_session_id_is_malformed() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        let mut input = hook("s1", None, "Stop");
        input.session_id = None;
        assert!(matches!(
            store.update(&input),
            Err(BeaconError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_missing_event_name_is_skipped() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        let mut input = hook("s1", None, "Stop");
        input.hook_event_name = None;
        assert!(store.update(&input).unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_session_end_for_unknown_session_creates_nothing() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        assert!(store
            .update(&hook("ghost", None, "SessionEnd"))
            .unwrap()
            .is_none());
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_resets_to_empty() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        std::fs::write(store.path(), "{ not json").unwrap();

        assert!(store.snapshot().unwrap().is_empty());
        store
            .update_at(&hook("s1", None, "SessionStart"), at(0))
            .unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_provenance_is_merged_not_erased() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        let mut start = hook("s1", Some("/dev/ttys001"), "SessionStart");
        start.term_program = Some("tmux".to_string());
        start.multiplexer_socket = Some("/tmp/tmux-501/default".to_string());
        store.update_at(&start, at(0)).unwrap();

        let session = store
            .update_at(&hook("s1", Some("/dev/ttys001"), "Stop"), at(1))
            .unwrap()
            .unwrap();
        assert_eq!(session.term_program.as_deref(), Some("tmux"));
        assert_eq!(
            session.multiplexer_socket.as_deref(),
            Some("/tmp/tmux-501/default")
        );
    }

    // ─── Scenario: TTY migration ─────────────────────────────────────────

    #[test]
    fn test_new_session_on_tty_retires_previous() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store
            .update_at(&hook("old", Some("/dev/ttys001"), "SessionStart"), at(0))
            .unwrap();
        store
            .update_at(&hook("new", Some("/dev/ttys001"), "SessionStart"), at(1))
            .unwrap();

        let active = store.active_sessions(at(2)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "new");
        let old = store.get("old:/dev/ttys001").unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Stopped);
    }

    #[test]
    fn test_migration_carries_acknowledgment_to_waiting_successor() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store
            .update_at(&hook("old", Some("/dev/ttys001"), "Stop"), at(0))
            .unwrap();
        assert!(store.acknowledge("old:/dev/ttys001").unwrap());

        let new = store
            .update_at(&hook("new", Some("/dev/ttys001"), "Stop"), at(1))
            .unwrap()
            .unwrap();
        assert!(new.is_acknowledged);

        let running = store
            .update_at(&hook("newer", Some("/dev/ttys001"), "SessionStart"), at(2))
            .unwrap()
            .unwrap();
        assert!(!running.is_acknowledged);
    }

    #[test]
    fn test_late_event_from_retired_session_leaves_successor_running() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store
            .update_at(&hook("a", Some("/dev/ttys001"), "SessionStart"), at(0))
            .unwrap();
        store
            .update_at(&hook("b", Some("/dev/ttys001"), "SessionStart"), at(1))
            .unwrap();
        store
            .update_at(&hook("a", Some("/dev/ttys001"), "PostToolUse"), at(2))
            .unwrap();
        store
            .update_at(&hook("a", Some("/dev/ttys001"), "SessionEnd"), at(3))
            .unwrap();

        let b = store.get("b:/dev/ttys001").unwrap().unwrap();
        assert_eq!(b.status, SessionStatus::Running);
        let active = store.active_sessions(at(4)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "b");
    }

    #[test]
    fn test_editor_sessions_without_tty_coexist() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store.update_at(&hook("a", None, "SessionStart"), at(0)).unwrap();
        store.update_at(&hook("b", None, "SessionStart"), at(1)).unwrap();
        assert_eq!(store.active_sessions(at(2)).unwrap().len(), 2);
    }

    // ─── Scenario: commands ──────────────────────────────────────────────

    #[test]
    fn test_acknowledge_only_affects_waiting_sessions() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store
            .update_at(&hook("s1", Some("/dev/ttys001"), "SessionStart"), at(0))
            .unwrap();
        assert!(!store.acknowledge("s1:/dev/ttys001").unwrap());

        store
            .update_at(&hook("s1", Some("/dev/ttys001"), "PermissionRequest"), at(1))
            .unwrap();
        assert!(store.acknowledge("s1:/dev/ttys001").unwrap());
        let session = store.get("s1:/dev/ttys001").unwrap().unwrap();
        assert!(session.is_acknowledged);
        assert_eq!(session.status, SessionStatus::WaitingInput);
        assert_eq!(session.waiting_reason, Some(WaitingReason::PermissionPrompt));

        assert!(matches!(
            store.acknowledge("missing"),
            Err(BeaconError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_mark_stopped() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store.update_at(&hook("s1", None, "PreToolUse"), at(0)).unwrap();
        assert!(store.mark_stopped("s1").unwrap());
        assert!(!store.mark_stopped("s1").unwrap());
        assert!(!store.mark_stopped("missing").unwrap());

        let session = store.get("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(!session.is_tool_running);
    }

    #[test]
    fn test_update_learned_tab_index() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store.update_at(&hook("s1", None, "SessionStart"), at(0)).unwrap();
        store.update_learned_tab_index("s1", 4).unwrap();
        assert_eq!(store.get("s1").unwrap().unwrap().learned_tab_index, Some(4));
        assert!(store.update_learned_tab_index("nope", 1).is_err());
    }

    #[test]
    fn test_stopped_sessions_pruned_after_retention() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store.update_at(&hook("s1", None, "SessionStart"), at(0)).unwrap();
        store.update_at(&hook("s1", None, "SessionEnd"), at(1)).unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 1);

        store
            .update_at(&hook("s2", None, "SessionStart"), at(25 * 3600))
            .unwrap();
        let ids: Vec<_> = store
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["s2".to_string()]);
    }

    #[test]
    fn test_written_document_is_versioned() {
        let temp = tempdir().unwrap();
        let store = make_store(temp.path());
        store.update_at(&hook("s1", None, "SessionStart"), at(0)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], STORE_VERSION);
        assert_eq!(raw["sessions"]["s1"]["sessionId"], "s1");
        assert_eq!(raw["sessions"]["s1"]["status"], "running");
    }

    #[test]
    fn test_concurrent_writers_lose_no_updates() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sessions.json");

        let handles: Vec<_> = (0..6)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = SessionStore::open(&path, StoreConfig::default());
                    for i in 0..8 {
                        let id = format!("w{}-{}", worker, i);
                        store.update(&hook(&id, None, "SessionStart")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sessions = SessionStore::open(&path, StoreConfig::default())
            .snapshot()
            .unwrap();
        assert_eq!(sessions.len(), 48);

        let mut orders: Vec<_> = sessions.iter().filter_map(|s| s.display_order).collect();
        orders.sort_unstable();
        orders.dedup();
        assert_eq!(orders.len(), 48);
    }
}
