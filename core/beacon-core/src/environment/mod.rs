//! Environment classification: which app hosts a session.
//!
//! The resolver walks a fixed priority chain and stops at the first positive
//! answer:
//!
//! ```text
//! 1. editor bundle id recorded at hook time           → Editor
//! 2. actual terminal behind the multiplexer client    → Terminal(kind, multiplexed)
//! 3. TERM_PROGRAM captured at hook time               → Terminal(kind, ...)
//! 4. live: a terminal hosts the multiplexer's client  → Terminal(kind, multiplexed)
//! 5. live: a terminal hosts the session's tty         → Terminal(kind)
//! 6. default                                          → Terminal(Generic)
//! ```
//!
//! Steps 1-3 are pure reads of recorded provenance. Steps 4-5 ask a
//! [`LiveProbe`], whose answers describe the current desktop and are cached
//! only briefly (see [`CachedProbe`]).

pub mod provenance;
pub mod system;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::session::Session;

// ═══════════════════════════════════════════════════════════════════════════════
// Kinds
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    ITerm,
    TerminalApp,
    Ghostty,
    Kitty,
    WezTerm,
    Alacritty,
    Warp,
    Generic,
}

impl TerminalKind {
    /// Parses a `TERM_PROGRAM`-style value. Multiplexers and editors are not
    /// terminal kinds and yield `None`.
    pub fn from_term_program(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "iterm.app" | "iterm2" | "iterm" => Some(Self::ITerm),
            "apple_terminal" | "terminal" | "terminal.app" => Some(Self::TerminalApp),
            "ghostty" | "xterm-ghostty" => Some(Self::Ghostty),
            "kitty" | "xterm-kitty" => Some(Self::Kitty),
            "wezterm" | "wezterm-gui" => Some(Self::WezTerm),
            "alacritty" => Some(Self::Alacritty),
            "warpterminal" | "warp" => Some(Self::Warp),
            _ => None,
        }
    }

    /// Application name used for activation. `None` for the generic fallback.
    pub fn app_name(self) -> Option<&'static str> {
        match self {
            Self::ITerm => Some("iTerm"),
            Self::TerminalApp => Some("Terminal"),
            Self::Ghostty => Some("Ghostty"),
            Self::Kitty => Some("kitty"),
            Self::WezTerm => Some("WezTerm"),
            Self::Alacritty => Some("Alacritty"),
            Self::Warp => Some("Warp"),
            Self::Generic => None,
        }
    }

    /// Process names that identify a running instance.
    pub fn process_names(self) -> &'static [&'static str] {
        match self {
            Self::ITerm => &["iTerm2"],
            Self::TerminalApp => &["Terminal"],
            Self::Ghostty => &["ghostty"],
            Self::Kitty => &["kitty"],
            Self::WezTerm => &["wezterm-gui"],
            Self::Alacritty => &["alacritty"],
            Self::Warp => &["Warp", "stable"],
            Self::Generic => &[],
        }
    }
}

pub fn is_multiplexer_program(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "tmux" | "screen")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorKind {
    VsCode,
    VsCodeInsiders,
    Cursor,
    Windsurf,
    Zed,
    Other,
}

impl EditorKind {
    pub fn from_bundle_id(bundle_id: &str) -> Self {
        match bundle_id {
            "com.microsoft.VSCode" => Self::VsCode,
            "com.microsoft.VSCodeInsiders" => Self::VsCodeInsiders,
            "com.todesktop.230313mzl4w4u92" => Self::Cursor,
            "com.exafunction.windsurf" => Self::Windsurf,
            "dev.zed.Zed" | "dev.zed.Zed-Preview" => Self::Zed,
            _ => Self::Other,
        }
    }

    pub fn bundle_id(self) -> Option<&'static str> {
        match self {
            Self::VsCode => Some("com.microsoft.VSCode"),
            Self::VsCodeInsiders => Some("com.microsoft.VSCodeInsiders"),
            Self::Cursor => Some("com.todesktop.230313mzl4w4u92"),
            Self::Windsurf => Some("com.exafunction.windsurf"),
            Self::Zed => Some("dev.zed.Zed"),
            Self::Other => None,
        }
    }

    /// Tokens expected in the editor process name or executable path; used
    /// to reject PIDs that were recycled by an unrelated process.
    pub fn identity_tokens(self) -> &'static [&'static str] {
        match self {
            Self::VsCode => &["Visual Studio Code", "Code", "Electron"],
            Self::VsCodeInsiders => &["Code - Insiders", "Insiders"],
            Self::Cursor => &["Cursor"],
            Self::Windsurf => &["Windsurf"],
            Self::Zed => &["zed"],
            Self::Other => &[],
        }
    }

    /// Command-line launcher that focuses a window for a folder.
    pub fn cli(self) -> Option<&'static str> {
        match self {
            Self::VsCode => Some("code"),
            Self::VsCodeInsiders => Some("code-insiders"),
            Self::Cursor => Some("cursor"),
            Self::Windsurf => Some("windsurf"),
            Self::Zed => Some("zed"),
            Self::Other => None,
        }
    }

    /// Maps an ancestor process to an editor (used at hook time).
    pub fn from_process_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("code - insiders") || lower.contains("code-insiders") {
            Some(Self::VsCodeInsiders)
        } else if lower.contains("cursor") {
            Some(Self::Cursor)
        } else if lower.contains("windsurf") {
            Some(Self::Windsurf)
        } else if lower == "zed" || lower.starts_with("zed ") {
            Some(Self::Zed)
        } else if lower.contains("visual studio code") || lower == "code" || lower == "code helper"
        {
            Some(Self::VsCode)
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Editor {
        kind: EditorKind,
        bundle_id: String,
    },
    Terminal {
        kind: TerminalKind,
        multiplexer: bool,
        socket: Option<String>,
    },
}

impl Environment {
    pub fn is_multiplexed(&self) -> bool {
        matches!(self, Self::Terminal { multiplexer: true, .. })
    }
}

/// Which step of the chain produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    EditorBundle,
    ActualTermProgram,
    TermProgram,
    MultiplexerProbe,
    TtyProbe,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub environment: Environment,
    pub step: ResolutionStep,
}

/// Live desktop queries used by resolution steps 4 and 5.
pub trait LiveProbe {
    /// TTYs of clients attached to a multiplexer session.
    fn multiplexer_client_ttys(&self, socket: Option<&str>, session: &str) -> Result<Vec<String>>;

    /// Whether a running terminal of `kind` owns a tab/pane on `tty`.
    fn hosts_tty(&self, kind: TerminalKind, tty: &str) -> Result<bool>;
}

impl<P: LiveProbe + ?Sized> LiveProbe for &P {
    fn multiplexer_client_ttys(&self, socket: Option<&str>, session: &str) -> Result<Vec<String>> {
        (**self).multiplexer_client_ttys(socket, session)
    }

    fn hosts_tty(&self, kind: TerminalKind, tty: &str) -> Result<bool> {
        (**self).hosts_tty(kind, tty)
    }
}

pub struct EnvironmentResolver<P: LiveProbe> {
    probe: P,
    priority: Vec<TerminalKind>,
}

impl<P: LiveProbe> EnvironmentResolver<P> {
    pub fn new(probe: P, config: &EnvironmentConfig) -> Self {
        Self {
            probe,
            priority: config.terminal_priority.clone(),
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn resolve(&self, session: &Session) -> Environment {
        self.resolve_with_step(session).environment
    }

    pub fn resolve_with_step(&self, session: &Session) -> Resolution {
        let multiplexed = session.multiplexer_socket.is_some()
            || session
                .term_program
                .as_deref()
                .is_some_and(is_multiplexer_program);
        let terminal = |kind, step| Resolution {
            environment: Environment::Terminal {
                kind,
                multiplexer: multiplexed,
                socket: session.multiplexer_socket.clone(),
            },
            step,
        };

        // 1. Editor bundle id
        if let Some(bundle_id) = session.editor_bundle_id.as_deref().filter(|b| !b.is_empty()) {
            return Resolution {
                environment: Environment::Editor {
                    kind: EditorKind::from_bundle_id(bundle_id),
                    bundle_id: bundle_id.to_string(),
                },
                step: ResolutionStep::EditorBundle,
            };
        }

        // 2. Terminal found behind the multiplexer client
        if let Some(kind) = session
            .actual_term_program
            .as_deref()
            .and_then(TerminalKind::from_term_program)
        {
            return terminal(kind, ResolutionStep::ActualTermProgram);
        }

        // 3. TERM_PROGRAM from the hook's environment
        if let Some(kind) = session
            .term_program
            .as_deref()
            .and_then(TerminalKind::from_term_program)
        {
            return terminal(kind, ResolutionStep::TermProgram);
        }

        // 4. A running terminal hosts a client of the session's multiplexer session
        if let Some(mux_session) = session.multiplexer_session.as_deref() {
            if let Some(kind) = self.probe_multiplexer(session, mux_session) {
                return terminal(kind, ResolutionStep::MultiplexerProbe);
            }
        }

        // 5. A running terminal owns the session's tty
        if !multiplexed {
            if let Some(tty) = session.tty.as_deref() {
                if let Some(kind) = self.first_host_of(tty) {
                    return terminal(kind, ResolutionStep::TtyProbe);
                }
            }
        }

        // 6. Default
        terminal(TerminalKind::Generic, ResolutionStep::Default)
    }

    fn probe_multiplexer(&self, session: &Session, mux_session: &str) -> Option<TerminalKind> {
        let client_ttys = match self
            .probe
            .multiplexer_client_ttys(session.multiplexer_socket.as_deref(), mux_session)
        {
            Ok(ttys) => ttys,
            Err(err) => {
                tracing::debug!(error = %err, session = %mux_session, "Multiplexer probe failed");
                return None;
            }
        };
        client_ttys
            .iter()
            .find_map(|client_tty| self.first_host_of(client_tty))
    }

    fn first_host_of(&self, tty: &str) -> Option<TerminalKind> {
        self.priority.iter().copied().find(|&kind| {
            match self.probe.hosts_tty(kind, tty) {
                Ok(hosts) => hosts,
                Err(err) => {
                    tracing::debug!(error = %err, kind = ?kind, tty = %tty, "Terminal probe failed");
                    false
                }
            }
        })
    }
}

/// Caches probe answers for a short TTL.
pub struct CachedProbe<P: LiveProbe> {
    inner: P,
    ttl: Duration,
    clients: Mutex<HashMap<(Option<String>, String), (Instant, Vec<String>)>>,
    hosts: Mutex<HashMap<(TerminalKind, String), (Instant, bool)>>,
}

impl<P: LiveProbe> CachedProbe<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            clients: Mutex::new(HashMap::new()),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn fresh(&self, at: Instant) -> bool {
        at.elapsed() < self.ttl
    }
}

impl<P: LiveProbe> LiveProbe for CachedProbe<P> {
    fn multiplexer_client_ttys(&self, socket: Option<&str>, session: &str) -> Result<Vec<String>> {
        let key = (socket.map(str::to_string), session.to_string());
        if let Ok(cache) = self.clients.lock() {
            if let Some((at, ttys)) = cache.get(&key) {
                if self.fresh(*at) {
                    return Ok(ttys.clone());
                }
            }
        }
        let ttys = self.inner.multiplexer_client_ttys(socket, session)?;
        if let Ok(mut cache) = self.clients.lock() {
            cache.insert(key, (Instant::now(), ttys.clone()));
        }
        Ok(ttys)
    }

    fn hosts_tty(&self, kind: TerminalKind, tty: &str) -> Result<bool> {
        let key = (kind, tty.to_string());
        if let Ok(cache) = self.hosts.lock() {
            if let Some((at, hosts)) = cache.get(&key) {
                if self.fresh(*at) {
                    return Ok(*hosts);
                }
            }
        }
        let hosts = self.inner.hosts_tty(kind, tty)?;
        if let Ok(mut cache) = self.hosts.lock() {
            cache.insert(key, (Instant::now(), hosts));
        }
        Ok(hosts)
    }
}
