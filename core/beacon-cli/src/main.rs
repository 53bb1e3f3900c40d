//! beacon: query, focus and watch agent sessions.
//!
//! ## Subcommands
//!
//! - `list`: active sessions as text or `{sessions, offset, total}` JSON
//! - `focus`: bring a session's terminal or editor to the front
//! - `ack`: acknowledge a waiting session
//! - `watch`: observer + external-agent loop writing push events as JSON lines

mod watch;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use beacon_core::config::{self, BeaconConfig};
use beacon_core::environment::system::SystemProbe;
use beacon_core::external::{ExternalAgentReconciler, ProcessScanner, StatusReceiver};
use beacon_core::{
    collapse, list_sessions, render_text, BeaconError, CachedProbe, EnvironmentResolver,
    FocusManager, FocusOutcome, Selector, Session, SessionObserver, SessionStore,
    SystemFocusBackend, SysinfoScanner,
};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const EXIT_NOT_FOUND: i32 = 2;
const EXIT_NOT_RUNNING: i32 = 3;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Tracks coding-agent sessions and focuses the one that needs you")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List active sessions
    List {
        /// Emit `{sessions, offset, total}` JSON
        #[arg(long)]
        json: bool,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,

        /// Show one session per working directory
        #[arg(long)]
        collapse_teams: bool,
    },

    /// Focus a session's host window
    #[command(group(ArgGroup::new("selector").required(true).args(["index", "id", "waiting"])))]
    Focus {
        /// Zero-based position in `beacon list`
        #[arg(long)]
        index: Option<usize>,

        /// Composite session id
        #[arg(long)]
        id: Option<String>,

        /// Highest-priority waiting session
        #[arg(long)]
        waiting: bool,
    },

    /// Acknowledge a waiting session
    Ack {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Watch sessions and print push events as JSON lines
    Watch {
        /// Unix datagram socket for external agent status reports
        #[arg(long, value_name = "PATH")]
        status_socket: Option<PathBuf>,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(error = %err, "beacon failed");
            eprintln!("beacon: {}", err);
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("BEACON_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Context {
    base: PathBuf,
    config: BeaconConfig,
    store: SessionStore,
}

impl Context {
    fn load() -> Result<Self, BeaconError> {
        let base = config::beacon_dir()?;
        let config = BeaconConfig::load(&base);
        let store = SessionStore::open(&config::store_path(&base), config.store.clone());
        Ok(Self {
            base,
            config,
            store,
        })
    }

    /// Current view including any external agents visible right now.
    fn sessions(&self) -> Result<Vec<Session>, BeaconError> {
        let observer = SessionObserver::new(self.store.clone());

        let mut reconciler = ExternalAgentReconciler::new(&self.config.external);
        match SysinfoScanner::new(&self.config.external).scan() {
            Ok(scan) => {
                reconciler.reconcile(Utc::now(), &scan, &StatusReceiver::new());
                observer.set_external(reconciler.sessions());
            }
            Err(err) => tracing::debug!(error = %err, "External agent scan failed"),
        }

        Ok(observer
            .refresh()?
            .map(|view| view.sessions)
            .unwrap_or_default())
    }
}

fn run(cli: Cli) -> Result<i32, BeaconError> {
    let ctx = Context::load()?;

    match cli.command {
        Commands::List {
            json,
            offset,
            limit,
            collapse_teams,
        } => {
            let mut sessions = ctx.sessions()?;
            if collapse_teams {
                sessions = collapse(&sessions);
            }
            let list = list_sessions(&sessions, offset, limit);
            if json {
                let out = serde_json::to_string_pretty(&list).map_err(|source| BeaconError::Json {
                    context: "encoding session list".to_string(),
                    source,
                })?;
                println!("{}", out);
            } else {
                print!("{}", render_text(&list));
            }
            Ok(0)
        }

        Commands::Focus { index, id, waiting } => {
            let selector = match (index, id) {
                (Some(index), _) => Selector::Index(index),
                (None, Some(id)) => Selector::Id(id),
                (None, None) if waiting => Selector::HighestPriorityWaiting,
                (None, None) => return Ok(EXIT_NOT_FOUND),
            };
            let sessions = ctx.sessions()?;
            let Some(session) = selector.select(&sessions) else {
                eprintln!("No session matches {:?}", selector);
                return Ok(EXIT_NOT_FOUND);
            };

            let env_cfg = &ctx.config.environment;
            let probe = CachedProbe::new(
                SystemProbe::new(env_cfg),
                Duration::from_millis(env_cfg.probe_cache_ttl_ms),
            );
            let manager = FocusManager::new(
                SystemFocusBackend::new(env_cfg),
                EnvironmentResolver::new(probe, env_cfg),
                ctx.store.clone(),
                ctx.config.focus.clone(),
            );

            Ok(match manager.focus(session) {
                FocusOutcome::Success => {
                    println!("Focused {}", session.qualified_display_name());
                    0
                }
                FocusOutcome::PartialSuccess(reason) => {
                    println!("Focused {} ({})", session.qualified_display_name(), reason);
                    0
                }
                FocusOutcome::NotFound(hint) => {
                    eprintln!("Could not locate {}: {}", session.qualified_display_name(), hint);
                    EXIT_NOT_FOUND
                }
                FocusOutcome::NotRunning => {
                    eprintln!("The app hosting {} is not running", session.qualified_display_name());
                    EXIT_NOT_RUNNING
                }
            })
        }

        Commands::Ack { id } => match ctx.store.acknowledge(&id) {
            Ok(true) => {
                println!("Acknowledged {}", id);
                Ok(0)
            }
            Ok(false) => {
                println!("{} is not waiting for input", id);
                Ok(0)
            }
            Err(BeaconError::SessionNotFound(_)) => {
                eprintln!("No session {}", id);
                Ok(EXIT_NOT_FOUND)
            }
            Err(err) => Err(err),
        },

        Commands::Watch { status_socket } => {
            let socket = status_socket.unwrap_or_else(|| config::status_socket_path(&ctx.base));
            watch::run(&ctx.config, ctx.store, &socket)?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_requires_exactly_one_selector() {
        assert!(Cli::try_parse_from(["beacon", "focus"]).is_err());
        assert!(Cli::try_parse_from(["beacon", "focus", "--index", "1", "--waiting"]).is_err());
        assert!(Cli::try_parse_from(["beacon", "focus", "--waiting"]).is_ok());
    }

    #[test]
    fn test_list_flags() {
        let cli = Cli::try_parse_from([
            "beacon", "list", "--json", "--offset", "1", "--limit", "1", "--collapse-teams",
        ])
        .unwrap();
        match cli.command {
            Commands::List {
                json,
                offset,
                limit,
                collapse_teams,
            } => {
                assert!(json && collapse_teams);
                assert_eq!((offset, limit), (1, Some(1)));
            }
            _ => panic!("expected list"),
        }
    }
}
