//! Live desktop queries backed by real processes.
//!
//! Each terminal exposes its tabs differently: iTerm and Terminal.app via
//! AppleScript, kitty via `kitty @ ls`, WezTerm via `wezterm cli list`.
//! Ghostty, Alacritty and Warp expose nothing scriptable and never match.
//! The parsers are pure and unit-tested; the command wrappers are thin.

use serde::Deserialize;
use std::time::Duration;

use super::{LiveProbe, TerminalKind};
use crate::config::EnvironmentConfig;
use crate::error::{BeaconError, Result};
use crate::process::{any_process_named, run_with_timeout};

pub const FOUND: &str = "found";

/// Live probe that shells out with a bounded wait.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl LiveProbe for SystemProbe {
    fn multiplexer_client_ttys(&self, socket: Option<&str>, session: &str) -> Result<Vec<String>> {
        let output = tmux(
            socket,
            &["list-clients", "-t", session, "-F", "#{client_tty}"],
            self.timeout,
        )?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn hosts_tty(&self, kind: TerminalKind, tty: &str) -> Result<bool> {
        if !is_terminal_running(kind) {
            return Ok(false);
        }
        match kind {
            TerminalKind::ITerm => {
                Ok(osascript(&iterm_tab_script(TabMatch::Tty(tty), false), self.timeout)? == FOUND)
            }
            TerminalKind::TerminalApp => Ok(osascript(
                &terminal_tab_script(TabMatch::Tty(tty), false),
                self.timeout,
            )? == FOUND),
            TerminalKind::Kitty => {
                let windows = kitty_windows(self.timeout)?;
                Ok(kitty_window_on_tty(&windows, tty, self.timeout)?.is_some())
            }
            TerminalKind::WezTerm => {
                let panes = wezterm_panes(self.timeout)?;
                Ok(panes.iter().any(|p| p.tty_name.as_deref() == Some(tty)))
            }
            TerminalKind::Ghostty
            | TerminalKind::Alacritty
            | TerminalKind::Warp
            | TerminalKind::Generic => Ok(false),
        }
    }
}

pub fn is_terminal_running(kind: TerminalKind) -> bool {
    let names = kind.process_names();
    !names.is_empty() && any_process_named(names)
}

// ═══════════════════════════════════════════════════════════════════════════════
// tmux
// ═══════════════════════════════════════════════════════════════════════════════

pub fn tmux(socket: Option<&str>, args: &[&str], timeout: Duration) -> Result<String> {
    let mut full: Vec<&str> = Vec::with_capacity(args.len() + 2);
    if let Some(socket) = socket.filter(|s| !s.is_empty()) {
        full.push("-S");
        full.push(socket);
    }
    full.extend_from_slice(args);
    run_with_timeout("tmux", &full, timeout)
}

/// Extracts the socket path from a `$TMUX` value (`path,pid,index`).
pub fn socket_from_tmux_env(value: &str) -> Option<String> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ═══════════════════════════════════════════════════════════════════════════════
// AppleScript
// ═══════════════════════════════════════════════════════════════════════════════

pub fn osascript(script: &str, timeout: Duration) -> Result<String> {
    run_with_timeout("osascript", &["-e", script], timeout).map(|out| out.trim().to_string())
}

pub fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabMatch<'a> {
    Tty(&'a str),
    Title(&'a str),
}

/// Script that finds an iTerm session by tty or title, optionally selecting it.
/// Prints `found` or `missing`.
pub fn iterm_tab_script(target: TabMatch<'_>, select: bool) -> String {
    let condition = match target {
        TabMatch::Tty(tty) => format!("tty of s is \"{}\"", escape_applescript(tty)),
        TabMatch::Title(title) => format!("name of s contains \"{}\"", escape_applescript(title)),
    };
    let action = if select {
        "select w\n          tell t to select\n          tell s to select\n          activate\n          "
    } else {
        ""
    };
    format!(
        r#"tell application "iTerm2"
  repeat with w in windows
    repeat with t in tabs of w
      repeat with s in sessions of t
        if {condition} then
          {action}return "found"
        end if
      end repeat
    end repeat
  end repeat
  return "missing"
end tell"#
    )
}

/// Script that finds a Terminal.app tab by tty or title, optionally selecting it.
pub fn terminal_tab_script(target: TabMatch<'_>, select: bool) -> String {
    let condition = match target {
        TabMatch::Tty(tty) => format!("tty of t is \"{}\"", escape_applescript(tty)),
        TabMatch::Title(title) => {
            format!("custom title of t contains \"{}\"", escape_applescript(title))
        }
    };
    let action = if select {
        "set selected of t to true\n        set index of w to 1\n        activate\n        "
    } else {
        ""
    };
    format!(
        r#"tell application "Terminal"
  repeat with w in windows
    repeat with t in tabs of w
      if {condition} then
        {action}return "found"
      end if
    end repeat
  end repeat
  return "missing"
end tell"#
    )
}

/// Script printing the 1-based index of the focused tab in the front window.
pub fn focused_tab_index_script(app: &str) -> String {
    match app {
        "iTerm" => r#"tell application "iTerm2"
  set i to 0
  repeat with t in tabs of current window
    set i to i + 1
    if t is current tab of current window then return i
  end repeat
  return 0
end tell"#
            .to_string(),
        _ => format!(
            r#"tell application "{}"
  set i to 0
  repeat with t in tabs of front window
    set i to i + 1
    if selected of t then return i
  end repeat
  return 0
end tell"#,
            escape_applescript(app)
        ),
    }
}

/// Script selecting the tab at a 1-based index in the front window.
pub fn select_tab_index_script(app: &str, index: u32) -> String {
    match app {
        "iTerm" => format!(
            r#"tell application "iTerm2"
  activate
  if (count of tabs of current window) < {index} then return "missing"
  tell tab {index} of current window to select
  return "found"
end tell"#
        ),
        _ => format!(
            r#"tell application "{app}"
  activate
  if (count of tabs of front window) < {index} then return "missing"
  set selected tab of front window to tab {index} of front window
  return "found"
end tell"#,
            app = escape_applescript(app)
        ),
    }
}

pub fn activate_app_script(app: &str) -> String {
    format!("tell application \"{}\" to activate", escape_applescript(app))
}

// ═══════════════════════════════════════════════════════════════════════════════
// kitty
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct KittyOsWindow {
    #[serde(default)]
    tabs: Vec<KittyTab>,
}

#[derive(Debug, Deserialize)]
struct KittyTab {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    windows: Vec<KittyRawWindow>,
}

#[derive(Debug, Deserialize)]
struct KittyRawWindow {
    id: u64,
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cwd: String,
    #[serde(default)]
    is_focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KittyWindow {
    pub id: u64,
    pub tab_id: u64,
    pub pid: u32,
    pub title: String,
    pub cwd: String,
    pub is_focused: bool,
}

pub fn parse_kitty_ls(json: &str) -> Result<Vec<KittyWindow>> {
    let os_windows: Vec<KittyOsWindow> =
        serde_json::from_str(json).map_err(|e| BeaconError::probe("kitty @ ls", e.to_string()))?;
    Ok(os_windows
        .into_iter()
        .flat_map(|os| os.tabs)
        .flat_map(|tab| {
            let tab_id = tab.id;
            tab.windows.into_iter().map(move |w| KittyWindow {
                id: w.id,
                tab_id,
                pid: w.pid,
                title: w.title,
                cwd: w.cwd,
                is_focused: w.is_focused,
            })
        })
        .collect())
}

pub fn kitty_windows(timeout: Duration) -> Result<Vec<KittyWindow>> {
    parse_kitty_ls(&run_with_timeout("kitty", &["@", "ls"], timeout)?)
}

/// Finds the kitty window whose shell runs on `tty`.
pub fn kitty_window_on_tty<'a>(
    windows: &'a [KittyWindow],
    tty: &str,
    timeout: Duration,
) -> Result<Option<&'a KittyWindow>> {
    let pids: Vec<String> = windows
        .iter()
        .filter(|w| w.pid > 0)
        .map(|w| w.pid.to_string())
        .collect();
    if pids.is_empty() {
        return Ok(None);
    }
    let output = run_with_timeout(
        "ps",
        &["-o", "pid=,tty=", "-p", &pids.join(",")],
        timeout,
    )?;
    let owner = parse_ps_pid_tty(&output)
        .into_iter()
        .find(|(_, proc_tty)| *proc_tty == normalize_tty(tty))
        .map(|(pid, _)| pid);
    Ok(owner.and_then(|pid| windows.iter().find(|w| w.pid == pid)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WezTerm
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WezTermPane {
    pub pane_id: u64,
    #[serde(default)]
    pub tab_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub tty_name: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

pub fn parse_wezterm_list(json: &str) -> Result<Vec<WezTermPane>> {
    serde_json::from_str(json).map_err(|e| BeaconError::probe("wezterm cli list", e.to_string()))
}

pub fn wezterm_panes(timeout: Duration) -> Result<Vec<WezTermPane>> {
    parse_wezterm_list(&run_with_timeout(
        "wezterm",
        &["cli", "list", "--format", "json"],
        timeout,
    )?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ps
// ═══════════════════════════════════════════════════════════════════════════════

/// `ttys001` / `pts/3` → `/dev/ttys001` / `/dev/pts/3`. Unattached (`??`, `?`) → empty.
pub fn normalize_tty(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() || value.starts_with('?') || value == "-" {
        String::new()
    } else if value.starts_with("/dev/") {
        value.to_string()
    } else {
        format!("/dev/{}", value)
    }
}

/// Parses `ps -o pid=,tty=` output.
pub fn parse_ps_pid_tty(output: &str) -> Vec<(u32, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse().ok()?;
            let tty = normalize_tty(parts.next()?);
            (!tty.is_empty()).then_some((pid, tty))
        })
        .collect()
}
