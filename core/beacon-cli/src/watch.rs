//! `beacon watch`: the long-lived loop.
//!
//! Prints `host_info`, then `sessions.list`, then `session.added/updated/removed`
//! as the view changes. The external-agent scan piggybacks on the observer's
//! timer at its own interval.

use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use beacon_core::config::BeaconConfig;
use beacon_core::external::{ExternalAgentReconciler, ProcessScanner, StatusReceiver};
use beacon_core::process::host_name;
use beacon_core::query::session_item;
use beacon_core::{diff_views, BeaconError, SessionObserver, SessionStore, SessionView, SysinfoScanner};
use beacon_protocol::{HostInfo, PushEvent};
use chrono::{DateTime, Utc};

pub fn run(config: &BeaconConfig, store: SessionStore, status_socket: &Path) -> Result<(), BeaconError> {
    let observer = SessionObserver::new(store);
    let receiver = StatusReceiver::new();
    #[cfg(unix)]
    if let Err(err) = receiver.spawn_listener(status_socket) {
        tracing::warn!(error = %err, "Status socket unavailable; external agents report running only");
    }

    let scanner = SysinfoScanner::new(&config.external);
    let mut reconciler = ExternalAgentReconciler::new(&config.external);
    let scan_interval = chrono::Duration::seconds(config.external.scan_interval_secs as i64);
    let mut last_scan: Option<DateTime<Utc>> = None;

    emit(&PushEvent::HostInfo(HostInfo {
        hostname: host_name().unwrap_or_else(|| "unknown".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
    }))?;

    let mut previous: Option<SessionView> = None;

    observer.run(
        Duration::from_millis(config.observer.refresh_interval_ms),
        |now| {
            if last_scan.is_some_and(|at| now.signed_duration_since(at) < scan_interval) {
                return;
            }
            last_scan = Some(now);
            match scanner.scan() {
                Ok(scan) => {
                    reconciler.reconcile(now, &scan, &receiver);
                    observer.set_external(reconciler.sessions());
                }
                Err(err) => tracing::debug!(error = %err, "External agent scan failed"),
            }
        },
        |view| {
            let events = match &previous {
                None => vec![PushEvent::SessionsList {
                    sessions: view.sessions.iter().map(session_item).collect(),
                }],
                Some(prev) => diff_views(prev, view),
            };
            previous = Some(view.clone());

            for event in &events {
                if let Err(err) = emit(event) {
                    tracing::info!(error = %err, "Output closed, stopping watch");
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        },
    )
}

fn emit(event: &PushEvent) -> Result<(), BeaconError> {
    let line = serde_json::to_string(event).map_err(|source| BeaconError::Json {
        context: format!("encoding {}", event.name()),
        source,
    })?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)
        .and_then(|_| stdout.flush())
        .map_err(|e| BeaconError::io("writing push event", e))
}
