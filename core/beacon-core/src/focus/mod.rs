//! Bringing a session's host to the foreground.
//!
//! Split the same way as activation decisions elsewhere in the crate:
//!
//! ```text
//! EnvironmentResolver::resolve(session)   → Environment
//!    │
//!    ▼
//! plan_focus(environment, session)        → FocusPlan     (pure)
//!    │
//!    ▼
//! FocusManager executes the plan through a FocusBackend   → FocusOutcome
//! ```
//!
//! ## Outcome rules
//!
//! - Host app not running → `NotRunning`, never retried. A running check
//!   that keeps failing is not evidence either way, so the strategies run.
//! - A search strategy positively located the session → `Success`, except
//!   that a multiplexer session whose pane could not be selected is at most
//!   `PartialSuccess`.
//! - Nothing located it but the app could be raised → `PartialSuccess`.
//!   Non-multiplexer terminals that support tab indices also record the
//!   now-focused tab so the next focus can go straight there.
//! - Nothing worked → `NotFound`.

mod backend;

pub use backend::SystemFocusBackend;

use std::time::Duration;

use crate::config::FocusConfig;
use crate::environment::{EditorKind, Environment, EnvironmentResolver, LiveProbe, TerminalKind};
use crate::error::Result;
use crate::external::is_synthetic;
use crate::session::{Session, SessionStore};

pub const LEARNED_REASON: &str = "learned tab binding";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusOutcome {
    Success,
    PartialSuccess(String),
    NotFound(String),
    NotRunning,
}

impl FocusOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess(_))
    }
}

/// Application whose running state gates the whole attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppTarget {
    Editor { kind: EditorKind, pid: Option<u32> },
    Terminal(TerminalKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusStrategy {
    /// Ask the editor to focus the window holding `cwd`.
    EditorWindow {
        kind: EditorKind,
        bundle_id: String,
        cwd: String,
    },
    /// Point the attached multiplexer client at the session's pane.
    SelectMultiplexerPane {
        socket: Option<String>,
        target: String,
    },
    /// Raise the terminal tab that hosts a client of the multiplexer session.
    RaiseTerminalByTty {
        kind: TerminalKind,
        socket: Option<String>,
        session: String,
    },
    MatchTabByTty {
        kind: TerminalKind,
        tty: String,
    },
    MatchTabByTitle {
        kind: TerminalKind,
        title: String,
    },
    KittyRemote {
        tty: Option<String>,
        title: String,
    },
    LearnedTabIndex {
        kind: TerminalKind,
        index: u32,
    },
    ActivateApp {
        app: String,
    },
}

impl FocusStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EditorWindow { .. } => "editor_window",
            Self::SelectMultiplexerPane { .. } => "select_multiplexer_pane",
            Self::RaiseTerminalByTty { .. } => "raise_terminal_by_tty",
            Self::MatchTabByTty { .. } => "match_tab_by_tty",
            Self::MatchTabByTitle { .. } => "match_tab_by_title",
            Self::KittyRemote { .. } => "kitty_remote",
            Self::LearnedTabIndex { .. } => "learned_tab_index",
            Self::ActivateApp { .. } => "activate_app",
        }
    }
}

/// What to try, in order, for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusPlan {
    /// `None` when no host could be identified at all.
    pub target: Option<AppTarget>,
    /// Multiplexer pane selection, run before the GUI strategies.
    pub pane: Option<FocusStrategy>,
    /// Strategies that positively identify the session; first success wins.
    pub search: Vec<FocusStrategy>,
    /// Unconfirmed raise used when every search strategy misses.
    pub fallback: Option<FocusStrategy>,
    /// Terminal kind whose focused tab should be recorded after a fallback.
    pub learn: Option<TerminalKind>,
    /// Debug context explaining the plan.
    pub reason: String,
}

fn supports_tab_index(kind: TerminalKind) -> bool {
    matches!(kind, TerminalKind::ITerm | TerminalKind::TerminalApp)
}

/// Builds the ordered strategy list for a resolved environment.
pub fn plan_focus(environment: &Environment, session: &Session) -> FocusPlan {
    match environment {
        Environment::Editor { kind, bundle_id } => FocusPlan {
            target: Some(AppTarget::Editor {
                kind: *kind,
                pid: session.editor_pid,
            }),
            pane: None,
            search: vec![FocusStrategy::EditorWindow {
                kind: *kind,
                bundle_id: bundle_id.clone(),
                cwd: session.cwd.clone(),
            }],
            fallback: None,
            learn: None,
            reason: format!("Editor-hosted session ({})", bundle_id),
        },

        Environment::Terminal {
            kind: TerminalKind::Generic,
            multiplexer,
            socket,
        } => FocusPlan {
            target: None,
            pane: multiplexer
                .then(|| pane_strategy(session, socket.as_deref()))
                .flatten(),
            search: Vec::new(),
            fallback: None,
            learn: None,
            reason: "No terminal identified".to_string(),
        },

        Environment::Terminal {
            kind,
            multiplexer: true,
            socket,
        } => {
            let kind = *kind;
            let mut search = Vec::new();
            if let Some(mux_session) = session.multiplexer_session.clone() {
                match kind {
                    TerminalKind::ITerm
                    | TerminalKind::TerminalApp
                    | TerminalKind::Kitty
                    | TerminalKind::WezTerm => search.push(FocusStrategy::RaiseTerminalByTty {
                        kind,
                        socket: socket.clone(),
                        session: mux_session,
                    }),
                    _ => {}
                }
            }
            FocusPlan {
                target: Some(AppTarget::Terminal(kind)),
                pane: pane_strategy(session, socket.as_deref()),
                search,
                fallback: activate(kind),
                learn: None,
                reason: format!("Multiplexer session in {:?}", kind),
            }
        }

        Environment::Terminal {
            kind,
            multiplexer: false,
            ..
        } => {
            let kind = *kind;
            let title = session.display_name();
            let mut search = Vec::new();

            if let Some(index) = session.learned_tab_index.filter(|_| supports_tab_index(kind)) {
                search.push(FocusStrategy::LearnedTabIndex { kind, index });
            }
            match kind {
                TerminalKind::ITerm | TerminalKind::TerminalApp => {
                    if let Some(tty) = session.tty.clone() {
                        search.push(FocusStrategy::MatchTabByTty { kind, tty });
                    }
                    search.push(FocusStrategy::MatchTabByTitle { kind, title });
                }
                TerminalKind::WezTerm => {
                    if let Some(tty) = session.tty.clone() {
                        search.push(FocusStrategy::MatchTabByTty { kind, tty });
                    }
                    search.push(FocusStrategy::MatchTabByTitle { kind, title });
                }
                TerminalKind::Kitty => search.push(FocusStrategy::KittyRemote {
                    tty: session.tty.clone(),
                    title,
                }),
                _ => {}
            }

            FocusPlan {
                target: Some(AppTarget::Terminal(kind)),
                pane: None,
                search,
                fallback: activate(kind),
                learn: supports_tab_index(kind).then_some(kind),
                reason: format!("Terminal session in {:?}", kind),
            }
        }
    }
}

fn pane_strategy(session: &Session, socket: Option<&str>) -> Option<FocusStrategy> {
    let target = session
        .multiplexer_pane
        .clone()
        .or_else(|| session.multiplexer_session.clone())?;
    Some(FocusStrategy::SelectMultiplexerPane {
        socket: socket.map(str::to_string),
        target,
    })
}

fn activate(kind: TerminalKind) -> Option<FocusStrategy> {
    kind.app_name().map(|app| FocusStrategy::ActivateApp {
        app: app.to_string(),
    })
}

/// Side-effecting half of focusing: window-system automation.
pub trait FocusBackend {
    fn is_app_running(&self, target: &AppTarget) -> Result<bool>;

    /// `Ok(true)` when the strategy located and raised the session.
    fn execute(&self, strategy: &FocusStrategy) -> Result<bool>;

    /// 1-based index of the focused tab in the front window.
    fn focused_tab_index(&self, kind: TerminalKind) -> Result<Option<u32>>;
}

pub struct FocusManager<B: FocusBackend, P: LiveProbe> {
    backend: B,
    resolver: EnvironmentResolver<P>,
    store: SessionStore,
    config: FocusConfig,
}

impl<B: FocusBackend, P: LiveProbe> FocusManager<B, P> {
    pub fn new(
        backend: B,
        resolver: EnvironmentResolver<P>,
        store: SessionStore,
        config: FocusConfig,
    ) -> Self {
        Self {
            backend,
            resolver,
            store,
            config,
        }
    }

    pub fn focus(&self, session: &Session) -> FocusOutcome {
        let id = session.id();
        if is_synthetic(session) {
            return FocusOutcome::NotFound("session is a placeholder for an exited agent".into());
        }

        let environment = self.resolver.resolve(session);
        let plan = plan_focus(&environment, session);
        tracing::debug!(session = %id, env = ?environment, reason = %plan.reason, "Focus plan");

        let outcome = self.run_plan(session, &plan);
        tracing::info!(session = %id, outcome = ?outcome, "Focus finished");

        if outcome.is_success() && session.is_waiting() {
            if let Err(err) = self.store.acknowledge(&id) {
                tracing::warn!(session = %id, error = %err, "Failed to acknowledge focused session");
            }
        }
        outcome
    }

    fn run_plan(&self, session: &Session, plan: &FocusPlan) -> FocusOutcome {
        let Some(target) = &plan.target else {
            if let Some(pane) = &plan.pane {
                if self.attempt(pane) {
                    return FocusOutcome::PartialSuccess(
                        "selected multiplexer pane; host terminal unknown".to_string(),
                    );
                }
            }
            return FocusOutcome::NotFound(plan.reason.clone());
        };

        match self.with_retry(|| self.backend.is_app_running(target)) {
            Ok(true) => {}
            Ok(false) => return FocusOutcome::NotRunning,
            Err(err) => {
                tracing::debug!(error = %err, "App running check failed; trying strategies anyway");
            }
        }

        let pane_ok = plan.pane.as_ref().map(|pane| self.attempt(pane));
        if pane_ok == Some(false) {
            tracing::debug!(session = %session.id(), "Multiplexer pane selection failed");
        }

        if let Some(hit) = plan.search.iter().find(|s| self.attempt(s)) {
            tracing::debug!(strategy = hit.name(), "Focus strategy matched");
            return match pane_ok {
                Some(false) => FocusOutcome::PartialSuccess("pane selection failed".to_string()),
                _ => FocusOutcome::Success,
            };
        }

        let raised = plan.fallback.as_ref().is_some_and(|s| self.attempt(s));
        if !raised {
            return match pane_ok {
                Some(true) => FocusOutcome::PartialSuccess(
                    "selected multiplexer pane; terminal window not raised".to_string(),
                ),
                _ => FocusOutcome::NotFound(format!("no strategy located {}", session.id())),
            };
        }

        if let Some(kind) = plan.learn {
            if let Some(reason) = self.learn_tab(session, kind) {
                return FocusOutcome::PartialSuccess(reason);
            }
        }

        FocusOutcome::PartialSuccess(match pane_ok {
            Some(false) => "pane selection failed".to_string(),
            _ => "raised app without locating the session".to_string(),
        })
    }

    fn learn_tab(&self, session: &Session, kind: TerminalKind) -> Option<String> {
        let index = match self.with_retry(|| self.backend.focused_tab_index(kind)) {
            Ok(Some(index)) => index,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(error = %err, "Could not read focused tab index");
                return None;
            }
        };
        match self.store.update_learned_tab_index(&session.id(), index) {
            Ok(()) => {
                tracing::info!(session = %session.id(), index, "Learned tab binding");
                Some(LEARNED_REASON.to_string())
            }
            Err(err) => {
                tracing::warn!(session = %session.id(), error = %err, "Failed to store tab binding");
                None
            }
        }
    }

    fn attempt(&self, strategy: &FocusStrategy) -> bool {
        match self.with_retry(|| self.backend.execute(strategy)) {
            Ok(hit) => hit,
            Err(err) => {
                tracing::debug!(strategy = strategy.name(), error = %err, "Focus strategy failed");
                false
            }
        }
    }

    /// Retries transient failures with a fixed backoff. Negative answers
    /// (`Ok(false)`) are final.
    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.config.retry_attempts.max(1);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(attempt, error = %err, "Retrying focus query");
                    attempt += 1;
                    std::thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }
}
