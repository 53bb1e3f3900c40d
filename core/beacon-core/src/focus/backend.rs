use std::time::Duration;

use super::{AppTarget, FocusBackend, FocusStrategy};
use crate::config::EnvironmentConfig;
use crate::environment::system::{
    activate_app_script, focused_tab_index_script, is_terminal_running, iterm_tab_script,
    kitty_window_on_tty, kitty_windows, osascript, select_tab_index_script, terminal_tab_script,
    tmux, wezterm_panes, TabMatch, FOUND,
};
use crate::environment::{EditorKind, TerminalKind};
use crate::error::Result;
use crate::process::{any_process_named, is_pid_alive, process_info, run_with_timeout};

/// Focus backend driving the real window system.
#[derive(Debug, Clone)]
pub struct SystemFocusBackend {
    timeout: Duration,
}

impl SystemFocusBackend {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    fn select_tab(&self, kind: TerminalKind, target: TabMatch<'_>) -> Result<bool> {
        match kind {
            TerminalKind::ITerm => {
                Ok(osascript(&iterm_tab_script(target, true), self.timeout)? == FOUND)
            }
            TerminalKind::TerminalApp => {
                Ok(osascript(&terminal_tab_script(target, true), self.timeout)? == FOUND)
            }
            TerminalKind::WezTerm => self.wezterm_activate(target),
            TerminalKind::Kitty => match target {
                TabMatch::Tty(tty) => self.kitty_focus(Some(tty), ""),
                TabMatch::Title(title) => self.kitty_focus(None, title),
            },
            _ => Ok(false),
        }
    }

    fn wezterm_activate(&self, target: TabMatch<'_>) -> Result<bool> {
        let panes = wezterm_panes(self.timeout)?;
        let pane = panes.iter().find(|p| match target {
            TabMatch::Tty(tty) => p.tty_name.as_deref() == Some(tty),
            TabMatch::Title(title) => p.title.contains(title) || p.cwd.ends_with(title),
        });
        let Some(pane) = pane else {
            return Ok(false);
        };
        run_with_timeout(
            "wezterm",
            &["cli", "activate-pane", "--pane-id", &pane.pane_id.to_string()],
            self.timeout,
        )?;
        self.activate("WezTerm")?;
        Ok(true)
    }

    fn kitty_focus(&self, tty: Option<&str>, title: &str) -> Result<bool> {
        let windows = kitty_windows(self.timeout)?;
        let by_tty = match tty {
            Some(tty) => kitty_window_on_tty(&windows, tty, self.timeout)?,
            None => None,
        };
        let window = by_tty.or_else(|| {
            (!title.is_empty())
                .then(|| {
                    windows
                        .iter()
                        .find(|w| w.title.contains(title) || w.cwd.ends_with(title))
                })
                .flatten()
        });
        let Some(window) = window else {
            return Ok(false);
        };
        run_with_timeout(
            "kitty",
            &["@", "focus-window", "--match", &format!("id:{}", window.id)],
            self.timeout,
        )?;
        self.activate("kitty")?;
        Ok(true)
    }

    fn activate(&self, app: &str) -> Result<()> {
        osascript(&activate_app_script(app), self.timeout).map(|_| ())
    }

    fn focus_editor(&self, kind: EditorKind, bundle_id: &str, cwd: &str) -> Result<bool> {
        if let Some(cli) = kind.cli() {
            match run_with_timeout(cli, &[cwd], self.timeout) {
                Ok(_) => return Ok(true),
                Err(err) => tracing::debug!(cli, error = %err, "Editor CLI failed, using open -b"),
            }
        }
        run_with_timeout("open", &["-b", bundle_id, cwd], self.timeout)?;
        Ok(true)
    }
}

impl FocusBackend for SystemFocusBackend {
    fn is_app_running(&self, target: &AppTarget) -> Result<bool> {
        Ok(match target {
            AppTarget::Editor { kind, pid } => match pid {
                Some(pid) if is_pid_alive(*pid) => process_info(*pid)
                    .is_some_and(|info| info.matches_any(kind.identity_tokens())),
                _ => !kind.identity_tokens().is_empty() && any_process_named(kind.identity_tokens()),
            },
            AppTarget::Terminal(kind) => is_terminal_running(*kind),
        })
    }

    fn execute(&self, strategy: &FocusStrategy) -> Result<bool> {
        match strategy {
            FocusStrategy::EditorWindow {
                kind,
                bundle_id,
                cwd,
            } => self.focus_editor(*kind, bundle_id, cwd),

            FocusStrategy::SelectMultiplexerPane { socket, target } => {
                let socket = socket.as_deref();
                tmux(socket, &["select-window", "-t", target], self.timeout)?;
                tmux(socket, &["select-pane", "-t", target], self.timeout)?;
                tmux(socket, &["switch-client", "-t", target], self.timeout)?;
                Ok(true)
            }

            FocusStrategy::RaiseTerminalByTty {
                kind,
                socket,
                session,
            } => {
                let clients = tmux(
                    socket.as_deref(),
                    &["list-clients", "-t", session, "-F", "#{client_tty}"],
                    self.timeout,
                )?;
                for tty in clients.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    if self.select_tab(*kind, TabMatch::Tty(tty))? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            FocusStrategy::MatchTabByTty { kind, tty } => self.select_tab(*kind, TabMatch::Tty(tty)),

            FocusStrategy::MatchTabByTitle { kind, title } => {
                self.select_tab(*kind, TabMatch::Title(title))
            }

            FocusStrategy::KittyRemote { tty, title } => self.kitty_focus(tty.as_deref(), title),

            FocusStrategy::LearnedTabIndex { kind, index } => {
                let Some(app) = kind.app_name() else {
                    return Ok(false);
                };
                Ok(osascript(&select_tab_index_script(app, *index), self.timeout)? == FOUND)
            }

            FocusStrategy::ActivateApp { app } => {
                self.activate(app)?;
                Ok(true)
            }
        }
    }

    fn focused_tab_index(&self, kind: TerminalKind) -> Result<Option<u32>> {
        let Some(app) = kind.app_name() else {
            return Ok(None);
        };
        let output = osascript(&focused_tab_index_script(app), self.timeout)?;
        Ok(output.trim().parse::<u32>().ok().filter(|index| *index > 0))
    }
}
