//! Session orchestration for the media-sharing service.
//!
//! Provides:
//! - `ContextManager` - Process-wide entry point enforcing global quotas
//! - `Context` - One sharing session: a sink and the sources attached to it
//! - `Agent` - Run-step state machine driving a protocol session
//! - `SessionRegistry` - Session classes instantiated by name

pub mod agent;
pub mod context;
pub mod context_manager;
pub mod session;

#[cfg(test)]
mod test_support;

pub use agent::Agent;
pub use context::{Context, ContextDeps, DEFAULT_SYNC_TIMEOUT};
pub use context_manager::ContextManager;
pub use session::SessionRegistry;
