//! # beacon-core
//!
//! Core library for Beacon, which tracks coding-agent CLI sessions and brings
//! the right one to the foreground when it needs you.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The observer loop is a
//!   plain thread fed by filesystem notifications.
//! - **Graceful degradation**: Missing or corrupt files yield empty state,
//!   failed probes fall through to the next strategy. Nothing here panics
//!   the observer.
//! - **Single source of truth**: `sessions.json`, written only under the
//!   cross-process lock.
//! - **Pure decisions, thin effects**: event transitions, environment
//!   resolution and focus planning are pure functions; process and window
//!   system access sits behind traits (`LiveProbe`, `FocusBackend`,
//!   `LivenessProbe`, `ProcessScanner`).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use beacon_core::{config, SessionObserver, SessionStore};
//!
//! let base = config::beacon_dir()?;
//! let cfg = config::BeaconConfig::load(&base);
//! let store = SessionStore::open(&config::store_path(&base), cfg.store.clone());
//! let observer = SessionObserver::new(store);
//! let view = observer.refresh()?;
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod external;
pub mod focus;
pub mod observer;
pub mod process;
pub mod query;
pub mod session;
pub mod team;

pub use config::BeaconConfig;
pub use environment::{
    CachedProbe, EditorKind, Environment, EnvironmentResolver, LiveProbe, TerminalKind,
};
pub use error::{BeaconError, Result};
pub use external::{ExternalAgentReconciler, ProcessScanner, StatusReceiver, SysinfoScanner};
pub use focus::{FocusBackend, FocusManager, FocusOutcome, FocusStrategy, SystemFocusBackend};
pub use observer::{diff_views, LivenessProbe, SessionCounts, SessionObserver, SessionView};
pub use query::{list_sessions, render_text, Selector};
pub use session::{
    HookEvent, HookInput, Session, SessionStatus, SessionStore, Urgency, WaitingReason,
};
pub use team::{collapse, select_representative};
