//! Hookless agents: presence from process scans, status from datagrams.
//!
//! Some agent CLIs cannot run hooks. For those, a periodic process-table scan
//! says *whether* an agent runs in a directory and an optional status socket
//! says *what* it is doing. The reconciler folds both into per-cwd state:
//!
//! ```text
//! running ──(missing from scan)──► grace ──(> grace_secs)──► stopped (pid 0)
//!    ▲                                                          │
//!    └──────────────(seen again before pruning)─────────────────┤
//!                                                               ▼
//!                                          (> retention_secs) pruned
//! ```
//!
//! Every transition takes `now` as a parameter; the reconciler owns no timers.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use crate::config::{ExternalConfig, PaneMarkers};
use crate::error::{BeaconError, Result};
use crate::session::{normalize_path, Session, SessionStatus, WaitingReason};

pub const EXTERNAL_ID_PREFIX: &str = "external:";

pub fn external_id(cwd: &str) -> String {
    format!("{}{}", EXTERNAL_ID_PREFIX, normalize_path(cwd))
}

/// Placeholder left behind by an agent that is no longer running.
pub fn is_synthetic(session: &Session) -> bool {
    session.session_id.starts_with(EXTERNAL_ID_PREFIX) && !session.is_active()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Process scanning
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProcess {
    pub pid: u32,
    pub agent: String,
    pub cwd: String,
}

pub trait ProcessScanner {
    fn scan(&self) -> Result<Vec<AgentProcess>>;
}

/// Scans the process table with `sysinfo`, matching configured agent names.
#[derive(Debug, Clone)]
pub struct SysinfoScanner {
    agent_names: Vec<String>,
}

impl SysinfoScanner {
    pub fn new(config: &ExternalConfig) -> Self {
        Self {
            agent_names: config.agent_names.clone(),
        }
    }
}

impl ProcessScanner for SysinfoScanner {
    fn scan(&self) -> Result<Vec<AgentProcess>> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );

        let mut found = Vec::new();
        for (pid, process) in sys.processes() {
            let Some(agent) = match_agent(process.name(), process.cmd(), &self.agent_names) else {
                continue;
            };
            let Some(cwd) = process.cwd().map(|p| p.to_string_lossy().to_string()) else {
                continue;
            };
            found.push(AgentProcess {
                pid: pid.as_u32(),
                agent,
                cwd,
            });
        }
        Ok(dedupe_by_cwd(found))
    }
}

/// Returns the configured agent name a process represents, if any.
///
/// Checks the process name and the basenames of the first two argv entries,
/// which covers interpreters (`node /usr/local/bin/codex`).
pub fn match_agent(name: &str, cmd: &[String], agent_names: &[String]) -> Option<String> {
    let basename = |s: &str| {
        Path::new(s)
            .file_name()
            .map(|f| f.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    let mut candidates = vec![name.to_lowercase()];
    candidates.extend(cmd.iter().take(2).map(|arg| basename(arg)));

    agent_names
        .iter()
        .find(|agent| {
            let agent = agent.to_lowercase();
            candidates.iter().any(|c| *c == agent)
        })
        .cloned()
}

/// One entry per cwd; the lowest pid (usually the parent) wins.
fn dedupe_by_cwd(mut processes: Vec<AgentProcess>) -> Vec<AgentProcess> {
    processes.sort_by_key(|p| p.pid);
    let mut seen = BTreeMap::new();
    for process in processes {
        seen.entry(normalize_path(&process.cwd)).or_insert(process);
    }
    seen.into_values().collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status reports
// ═══════════════════════════════════════════════════════════════════════════════

/// One datagram from an agent wrapper: `{cwd, status?, waiting_reason?, pane_snapshot?}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    pub cwd: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub waiting_reason: Option<String>,
    #[serde(default)]
    pub pane_snapshot: Option<String>,
}

impl StatusReport {
    fn is_waiting(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_lowercase).as_deref(),
            Some("waiting" | "waitinginput" | "waiting_input")
        )
    }
}

/// Latest status report per cwd, shared between the listener thread and the
/// reconciler.
#[derive(Debug, Clone, Default)]
pub struct StatusReceiver {
    reports: Arc<Mutex<HashMap<String, StatusReport>>>,
}

impl StatusReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&self, datagram: &str) -> Result<()> {
        let report: StatusReport = serde_json::from_str(datagram.trim())
            .map_err(|e| BeaconError::MalformedInput(format!("status report: {}", e)))?;
        if report.cwd.trim().is_empty() {
            return Err(BeaconError::MalformedInput("status report without cwd".into()));
        }
        let key = normalize_path(&report.cwd);
        if let Ok(mut reports) = self.reports.lock() {
            reports.insert(key, report);
        }
        Ok(())
    }

    pub fn get(&self, cwd: &str) -> Option<StatusReport> {
        self.reports
            .lock()
            .ok()
            .and_then(|reports| reports.get(&normalize_path(cwd)).cloned())
    }

    pub fn forget(&self, cwd: &str) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.remove(&normalize_path(cwd));
        }
    }

    /// Binds a Unix datagram socket at `path` and feeds every datagram into
    /// this receiver from a background thread.
    #[cfg(unix)]
    pub fn spawn_listener(&self, path: &Path) -> Result<std::thread::JoinHandle<()>> {
        use std::os::unix::net::UnixDatagram;

        if path.exists() {
            fs_err::remove_file(path).map_err(|e| BeaconError::io("removing stale socket", e))?;
        }
        let socket = UnixDatagram::bind(path)
            .map_err(|e| BeaconError::io(format!("binding {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "Listening for status reports");

        let receiver = self.clone();
        Ok(std::thread::spawn(move || {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match socket.recv(&mut buf) {
                    Ok(len) => {
                        let text = String::from_utf8_lossy(&buf[..len]);
                        if let Err(err) = receiver.ingest(&text) {
                            tracing::warn!(error = %err, "Dropped status report");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Status socket closed");
                        break;
                    }
                }
            }
        }))
    }
}

impl PaneMarkers {
    /// True when the snapshot contains a token from every marker group.
    pub fn matches(&self, snapshot: &str) -> bool {
        !self.groups.is_empty()
            && self
                .groups
                .iter()
                .all(|group| group.iter().any(|token| snapshot.contains(token.as_str())))
    }
}

/// Structured reason first; otherwise a permission prompt needs every marker
/// group to match the pane snapshot.
pub fn infer_waiting_reason(report: &StatusReport, markers: &PaneMarkers) -> WaitingReason {
    if let Some(reason) = report.waiting_reason.as_deref() {
        let reason = reason.to_lowercase();
        return if reason.contains("permission") {
            WaitingReason::PermissionPrompt
        } else if reason == "stop" || reason == "idle" {
            WaitingReason::Stop
        } else {
            WaitingReason::Unknown
        };
    }
    match report.pane_snapshot.as_deref() {
        Some(snapshot) if markers.matches(snapshot) => WaitingReason::PermissionPrompt,
        _ => WaitingReason::Stop,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reconciler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSession {
    pub cwd: String,
    pub agent: String,
    /// 0 once the agent has been declared stopped.
    pub pid: u32,
    pub status: SessionStatus,
    pub waiting_reason: Option<WaitingReason>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ExternalAgentReconciler {
    sessions: BTreeMap<String, ExternalSession>,
    grace: Duration,
    retention: Duration,
    markers: PaneMarkers,
}

impl ExternalAgentReconciler {
    pub fn new(config: &ExternalConfig) -> Self {
        Self {
            sessions: BTreeMap::new(),
            grace: Duration::seconds(config.grace_secs as i64),
            retention: Duration::seconds(config.retention_secs as i64),
            markers: config.markers.clone(),
        }
    }

    /// Folds one scan into the state machine. Absence is measured from the
    /// last time the agent was seen.
    pub fn reconcile(&mut self, now: DateTime<Utc>, scan: &[AgentProcess], reports: &StatusReceiver) {
        for process in scan {
            let key = normalize_path(&process.cwd);
            let (status, waiting_reason) = match reports.get(&key) {
                Some(report) if report.is_waiting() => (
                    SessionStatus::WaitingInput,
                    Some(infer_waiting_reason(&report, &self.markers)),
                ),
                _ => (SessionStatus::Running, None),
            };

            let entry = self.sessions.entry(key.clone()).or_insert_with(|| {
                tracing::info!(cwd = %key, agent = %process.agent, "External agent appeared");
                ExternalSession {
                    cwd: key.clone(),
                    agent: process.agent.clone(),
                    pid: process.pid,
                    status,
                    waiting_reason,
                    first_seen: now,
                    last_seen: now,
                }
            });
            if entry.status == SessionStatus::Stopped {
                tracing::info!(cwd = %key, "External agent reappeared");
            }
            entry.pid = process.pid;
            entry.status = status;
            entry.waiting_reason = waiting_reason;
            entry.last_seen = now;
        }

        let present: Vec<String> = scan.iter().map(|p| normalize_path(&p.cwd)).collect();
        let (grace, retention) = (self.grace, self.retention);
        self.sessions.retain(|key, session| {
            if present.contains(key) {
                return true;
            }
            let absent = now.signed_duration_since(session.last_seen);
            if absent > retention {
                tracing::debug!(cwd = %key, "Pruned external agent");
                reports.forget(key);
                return false;
            }
            if absent > grace && session.status != SessionStatus::Stopped {
                tracing::info!(cwd = %key, "External agent stopped");
                session.status = SessionStatus::Stopped;
                session.waiting_reason = None;
                session.pid = 0;
            }
            true
        });
    }

    pub fn get(&self, cwd: &str) -> Option<&ExternalSession> {
        self.sessions.get(&normalize_path(cwd))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Projects tracked agents into sessions so the observer counts them.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.values().map(project).collect()
    }
}

fn project(external: &ExternalSession) -> Session {
    let mut session = Session::new(
        &external_id(&external.cwd),
        &external.cwd,
        None,
        external.first_seen,
    );
    match (external.status, external.waiting_reason) {
        (SessionStatus::WaitingInput, Some(reason)) => session.enter_waiting(reason),
        (SessionStatus::WaitingInput, None) => session.enter_waiting(WaitingReason::Unknown),
        (SessionStatus::Stopped, _) => session.enter_stopped(),
        (SessionStatus::Running, _) => session.enter_running(),
    }
    session.updated_at = external.last_seen;
    session.tool_name = Some(external.agent.clone());
    session.last_event = Some("external.scan".to_string());
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn codex(cwd: &str, pid: u32) -> AgentProcess {
        AgentProcess {
            pid,
            agent: "codex".to_string(),
            cwd: cwd.to_string(),
        }
    }

    fn reconciler() -> ExternalAgentReconciler {
        ExternalAgentReconciler::new(&ExternalConfig::default())
    }

    // ─── Scenario: presence state machine ────────────────────────────────

    #[test]
    fn test_short_absence_stays_running() {
        let mut r = reconciler();
        let reports = StatusReceiver::new();
        r.reconcile(t(0), &[codex("/work/app", 42)], &reports);
        r.reconcile(t(5), &[], &reports);

        let s = r.get("/work/app").unwrap();
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.pid, 42);
    }

    #[test]
    fn test_absence_past_grace_stops_with_pid_zero() {
        let mut r = reconciler();
        let reports = StatusReceiver::new();
        r.reconcile(t(0), &[codex("/work/app", 42)], &reports);
        r.reconcile(t(30), &[], &reports);

        let s = r.get("/work/app").unwrap();
        assert_eq!(s.status, SessionStatus::Stopped);
        assert_eq!(s.pid, 0);
        assert!(is_synthetic(&r.sessions()[0]));
    }

    #[test]
    fn test_absence_past_retention_prunes() {
        let mut r = reconciler();
        let reports = StatusReceiver::new();
        r.reconcile(t(0), &[codex("/work/app", 42)], &reports);
        r.reconcile(t(30), &[], &reports);
        r.reconcile(t(121), &[], &reports);
        assert!(r.is_empty());
    }

    #[test]
    fn test_reappearance_before_pruning_reverts_to_running() {
        let mut r = reconciler();
        let reports = StatusReceiver::new();
        r.reconcile(t(0), &[codex("/work/app", 42)], &reports);
        r.reconcile(t(30), &[], &reports);
        r.reconcile(t(40), &[codex("/work/app/", 77)], &reports);

        let s = r.get("/work/app").unwrap();
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.pid, 77);
        assert_eq!(s.first_seen, t(0));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_status_report_drives_waiting() {
        let mut r = reconciler();
        let reports = StatusReceiver::new();
        reports
            .ingest(r#"{"cwd": "/work/app", "status": "waiting", "waiting_reason": "permission"}"#)
            .unwrap();
        r.reconcile(t(0), &[codex("/work/app", 42)], &reports);

        let projected = r.sessions();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].id(), "external:/work/app");
        assert_eq!(projected[0].waiting_reason, Some(WaitingReason::PermissionPrompt));
        assert_eq!(projected[0].tool_name.as_deref(), Some("codex"));
        assert!(!is_synthetic(&projected[0]));
    }

    // ─── Scenario: waiting-reason inference ──────────────────────────────

    fn report(reason: Option<&str>, snapshot: Option<&str>) -> StatusReport {
        StatusReport {
            cwd: "/work/app".to_string(),
            status: Some("waiting".to_string()),
            waiting_reason: reason.map(str::to_string),
            pane_snapshot: snapshot.map(str::to_string),
        }
    }

    #[test]
    fn test_structured_reason_wins_over_snapshot() {
        let markers = PaneMarkers::default();
        let snapshot = "Do you want to run this?\n1. Yes\n2. No";
        assert_eq!(
            infer_waiting_reason(&report(Some("stop"), Some(snapshot)), &markers),
            WaitingReason::Stop
        );
    }

    #[test]
    fn test_snapshot_needs_every_marker_group() {
        let markers = PaneMarkers::default();
        assert_eq!(
            infer_waiting_reason(
                &report(None, Some("Do you want to run this?\n1. Yes\n2. No")),
                &markers
            ),
            WaitingReason::PermissionPrompt
        );
        assert_eq!(
            infer_waiting_reason(&report(None, Some("Do you want me to continue?")), &markers),
            WaitingReason::Stop
        );
        assert_eq!(infer_waiting_reason(&report(None, None), &markers), WaitingReason::Stop);
    }

    #[test]
    fn test_empty_marker_config_never_matches() {
        let markers = PaneMarkers { groups: Vec::new() };
        assert!(!markers.matches("Allow? Yes No"));
    }

    // ─── Scenario: inputs ────────────────────────────────────────────────

    #[test]
    fn test_ingest_rejects_malformed_reports() {
        let reports = StatusReceiver::new();
        assert!(matches!(
            reports.ingest("not json"),
            Err(BeaconError::MalformedInput(_))
        ));
        assert!(reports.ingest(r#"{"cwd": " "}"#).is_err());
        reports.ingest(r#"{"cwd": "/work/app/"}"#).unwrap();
        assert!(reports.get("/work/app").is_some());
    }

    #[test]
    fn test_match_agent_checks_name_and_argv() {
        let names = vec!["codex".to_string(), "aider".to_string()];
        assert_eq!(match_agent("codex", &[], &names).as_deref(), Some("codex"));
        assert_eq!(
            match_agent(
                "node",
                &["node".to_string(), "/usr/local/bin/codex".to_string()],
                &names
            )
            .as_deref(),
            Some("codex")
        );
        assert_eq!(match_agent("Aider", &[], &names).as_deref(), Some("aider"));
        assert_eq!(match_agent("codex-helper", &[], &names), None);
    }

    #[test]
    fn test_dedupe_keeps_lowest_pid_per_cwd() {
        let deduped = dedupe_by_cwd(vec![codex("/work/app", 90), codex("/work/app/", 12)]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].pid, 12);
    }

    #[cfg(unix)]
    #[test]
    fn test_listener_ingests_datagrams() {
        use std::os::unix::net::UnixDatagram;

        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("status.sock");
        let reports = StatusReceiver::new();
        let _handle = reports.spawn_listener(&path).unwrap();

        let client = UnixDatagram::unbound().unwrap();
        client
            .send_to(br#"{"cwd": "/work/app", "status": "waiting"}"#, &path)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while reports.get("/work/app").is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(reports.get("/work/app").unwrap().is_waiting());
    }
}
