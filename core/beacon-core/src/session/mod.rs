//! Session state and persistence.
//!
//! Beacon follows a **sidecar philosophy**: hooks report what the agent is
//! doing, the store records it, and everything else reads the store.
//!
//! ```text
//! agent → beacon-hook → SessionStore (sessions.json + lock) → SessionObserver → UI / CLI
//!        (one-shot)        (shared, locked)                   (long-lived)
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: `Session`, `StoreData` and the on-disk shape
//! - [`event`]: hook stdin payload and notification classification
//! - [`transition`]: pure event → state mapping
//! - [`store`]: locked read-modify-write persistence
//! - [`lock`]: sidecar flock guard

mod event;
pub(crate) mod lock;
mod store;
mod transition;
mod types;

pub use event::{classify_notification, HookEvent, HookInput, NotificationKind};
pub use store::SessionStore;
pub use transition::{apply_hook_event, apply_protocol_event, waiting_reason_for};
pub use types::{
    composite_id, normalize_path, sort_for_display, Session, SessionStatus, StoreData, Urgency,
    WaitingReason, STORE_VERSION,
};
