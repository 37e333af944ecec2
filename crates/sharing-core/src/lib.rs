//! Core abstractions for the media-sharing orchestration service.
//!
//! This crate provides the fundamental building blocks:
//! - `SharingEvent` - Typed envelope routed between modules
//! - `SharingErrorCode` - Closed error taxonomy with stable wire codes
//! - `IdGenerator` - Monotonic id source for contexts and agents
//! - `JsonConfig` / `AgentLimits` - Module/tag/key configuration
//! - `EventLog` - Broadcast + history tap over dispatched events
//! - Router, session and listener traits

pub mod config;
pub mod error;
pub mod event;
pub mod event_log;
pub mod identifier;
pub mod traits;
pub mod types;

pub use config::{AgentLimits, JsonConfig};
pub use error::{SharingErrorCode, SharingResult};
pub use event::{EventPayload, EventType, ModuleType, SharingEvent};
pub use event_log::EventLog;
pub use identifier::IdGenerator;
pub use traits::{AgentListener, EventRouter, ModuleEndpoint, Session, SessionListener};
pub use types::{AgentType, INVALID_ID, MediaStatus, RunStep, RunningStatus};
