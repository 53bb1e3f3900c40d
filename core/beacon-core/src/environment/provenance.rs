//! Hook-time capture of where a session lives.
//!
//! The agent's hook payload says nothing about the terminal, so the hook
//! fills the gaps from its own environment and process ancestry before the
//! store sees the event. Fields the payload already carries are never
//! overwritten.

use std::time::Duration;

use super::system::{normalize_tty, socket_from_tmux_env, tmux};
use super::{EditorKind, TerminalKind};
use crate::process::{ancestors, run_with_timeout, ProcessInfo};
use crate::session::HookInput;

/// Environment variables relevant to provenance, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub term_program: Option<String>,
    pub tmux: Option<String>,
    pub tmux_pane: Option<String>,
}

impl EnvSnapshot {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            term_program: var("TERM_PROGRAM"),
            tmux: var("TMUX"),
            tmux_pane: var("TMUX_PANE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub tty: Option<String>,
    pub term_program: Option<String>,
    pub actual_term_program: Option<String>,
    pub editor_bundle_id: Option<String>,
    pub editor_pid: Option<u32>,
    pub multiplexer_socket: Option<String>,
    pub multiplexer_pane: Option<String>,
    pub multiplexer_session: Option<String>,
}

impl Provenance {
    /// Gathers provenance for the agent process `agent_pid`.
    pub fn capture(env: &EnvSnapshot, agent_pid: u32, timeout: Duration) -> Self {
        let mut provenance = Provenance {
            tty: tty_of_pid(agent_pid, timeout),
            term_program: env.term_program.clone(),
            multiplexer_socket: env.tmux.as_deref().and_then(socket_from_tmux_env),
            multiplexer_pane: env.tmux_pane.clone(),
            ..Default::default()
        };

        if let Some((kind, pid)) = editor_from_chain(&ancestors(agent_pid)) {
            provenance.editor_bundle_id = kind.bundle_id().map(str::to_string);
            provenance.editor_pid = Some(pid);
        }

        if provenance.multiplexer_socket.is_some() {
            let socket = provenance.multiplexer_socket.as_deref();
            let pane = provenance.multiplexer_pane.as_deref();
            provenance.multiplexer_session = tmux_format(socket, pane, "#{session_name}", timeout);
            provenance.actual_term_program = tmux_format(socket, pane, "#{client_pid}", timeout)
                .and_then(|pid| pid.parse::<u32>().ok())
                .and_then(|client_pid| {
                    let mut chain = ancestors(client_pid);
                    chain.extend(crate::process::process_info(client_pid));
                    terminal_from_chain(&chain)
                })
                .map(|kind| kind.term_program().to_string());
        }

        provenance
    }

    /// Copies captured values into `input` where the payload had none.
    pub fn fill_missing(&self, input: &mut HookInput) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut input.tty, &self.tty);
        fill(&mut input.term_program, &self.term_program);
        fill(&mut input.actual_term_program, &self.actual_term_program);
        fill(&mut input.editor_bundle_id, &self.editor_bundle_id);
        fill(&mut input.editor_pid, &self.editor_pid);
        fill(&mut input.multiplexer_socket, &self.multiplexer_socket);
        fill(&mut input.multiplexer_pane, &self.multiplexer_pane);
        fill(&mut input.multiplexer_session, &self.multiplexer_session);
    }
}

fn tty_of_pid(pid: u32, timeout: Duration) -> Option<String> {
    let output = run_with_timeout("ps", &["-o", "tty=", "-p", &pid.to_string()], timeout).ok()?;
    let tty = normalize_tty(output.lines().next().unwrap_or_default());
    (!tty.is_empty()).then_some(tty)
}

fn tmux_format(
    socket: Option<&str>,
    pane: Option<&str>,
    format: &str,
    timeout: Duration,
) -> Option<String> {
    let mut args = vec!["display-message", "-p"];
    if let Some(pane) = pane {
        args.extend(["-t", pane]);
    }
    args.push(format);
    let value = tmux(socket, &args, timeout).ok()?.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// The outermost editor in an ancestor chain (the main app, not a helper).
pub fn editor_from_chain(chain: &[ProcessInfo]) -> Option<(EditorKind, u32)> {
    chain
        .iter()
        .filter_map(|p| EditorKind::from_process_name(&p.name).map(|kind| (kind, p.pid)))
        .last()
}

/// The nearest terminal emulator in an ancestor chain.
pub fn terminal_from_chain(chain: &[ProcessInfo]) -> Option<TerminalKind> {
    chain.iter().find_map(|p| TerminalKind::from_process_name(&p.name))
}

impl TerminalKind {
    /// Canonical `TERM_PROGRAM` spelling, so recorded values round-trip
    /// through `from_term_program`.
    pub fn term_program(self) -> &'static str {
        match self {
            Self::ITerm => "iTerm.app",
            Self::TerminalApp => "Apple_Terminal",
            Self::Ghostty => "ghostty",
            Self::Kitty => "kitty",
            Self::WezTerm => "WezTerm",
            Self::Alacritty => "alacritty",
            Self::Warp => "WarpTerminal",
            Self::Generic => "generic",
        }
    }

    pub fn from_process_name(name: &str) -> Option<Self> {
        [
            Self::ITerm,
            Self::TerminalApp,
            Self::Ghostty,
            Self::Kitty,
            Self::WezTerm,
            Self::Alacritty,
            Self::Warp,
        ]
        .into_iter()
        .find(|kind| {
            kind.process_names()
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(name))
        })
    }
}
