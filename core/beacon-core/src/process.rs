//! Process inspection and bounded command execution.
//!
//! Everything that shells out (`tmux`, `osascript`, `kitty @`, `ps`) goes
//! through [`run_with_timeout`] so a wedged helper can never stall a hook or
//! the observer loop.

use std::cell::RefCell;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

use crate::error::{BeaconError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_PARENT_DEPTH: usize = 32;

// Per-PID refresh keeps lookups O(1) instead of scanning the process table.
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<System>> = const { RefCell::new(None) };
}

pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 performs only the existence/permission check.
        #[allow(unsafe_code)]
        unsafe {
            libc::kill(pid as i32, 0) == 0
        }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

pub fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() has no failure modes.
        #[allow(unsafe_code)]
        Some(unsafe { libc::getppid() } as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Name, executable path and parent of a live process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<String>,
    pub parent: Option<u32>,
}

impl ProcessInfo {
    /// Case-insensitive match of any token against the name or executable path.
    pub fn matches_any(&self, tokens: &[&str]) -> bool {
        let name = self.name.to_lowercase();
        let exe = self.exe.as_deref().unwrap_or_default().to_lowercase();
        tokens.iter().any(|token| {
            let token = token.to_lowercase();
            name.contains(&token) || exe.contains(&token)
        })
    }
}

pub fn process_info(pid: u32) -> Option<ProcessInfo> {
    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);

        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(
            sysinfo_pid,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        sys.process(sysinfo_pid).map(|process| ProcessInfo {
            pid,
            name: process.name().to_string(),
            exe: process.exe().map(|p| p.to_string_lossy().to_string()),
            parent: process.parent().map(|p| p.as_u32()),
        })
    })
}

/// Walks from `pid` towards init, returning each ancestor (excluding `pid`).
pub fn ancestors(pid: u32) -> Vec<ProcessInfo> {
    let mut chain = Vec::new();
    let mut current = process_info(pid).and_then(|p| p.parent);
    while let Some(next) = current {
        if next <= 1 || chain.len() >= MAX_PARENT_DEPTH {
            break;
        }
        match process_info(next) {
            Some(info) => {
                current = info.parent;
                chain.push(info);
            }
            None => break,
        }
    }
    chain
}

/// Whether any process with a name matching one of `names` is running.
pub fn any_process_named(names: &[&str]) -> bool {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessRefreshKind::new());
    sys.processes().values().any(|process| {
        let name = process.name().to_lowercase();
        names.iter().any(|n| name == n.to_lowercase())
    })
}

pub fn host_name() -> Option<String> {
    System::host_name()
}

/// Runs a command, capturing stdout, killing it after `timeout`.
///
/// Non-zero exit is a `ProbeFailure`; overrunning is a `ProbeTimeout`.
pub fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let probe = || format!("{} {}", program, args.first().copied().unwrap_or_default());

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BeaconError::probe(probe(), e.to_string()))?;

    // Drain pipes on threads so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            pipe.read_to_string(&mut buf).map(|_| buf)
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(probe = %probe(), "Killed command after timeout");
                return Err(BeaconError::ProbeTimeout {
                    probe: probe(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(BeaconError::probe(probe(), e.to_string())),
        }
    };

    let output = match stdout.map(|h| h.join()) {
        Some(Ok(Ok(buf))) => buf,
        Some(Ok(Err(e))) => return Err(BeaconError::probe(probe(), e.to_string())),
        Some(Err(_)) => return Err(BeaconError::probe(probe(), "stdout reader panicked")),
        None => String::new(),
    };

    if !status.success() {
        let detail = stderr
            .and_then(|h| h.join().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("exit status {}", status));
        return Err(BeaconError::probe(probe(), detail));
    }

    Ok(output)
}
