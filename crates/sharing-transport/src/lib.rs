//! Transport layer for the media-sharing service.
//!
//! Provides:
//! - Wire protocol for interaction clients (JSON + base64 surfaces)
//! - The orchestration event loop and its router
//! - Loopback media channel, interaction and session for hosts without a pipeline
//! - `SharingService` request/reply surface and a line-delimited server

pub mod event_loop;
pub mod loopback;
pub mod protocol;
pub mod service;

pub use event_loop::{EventLoop, EventLoopConfig, EventLoopHandle};
pub use protocol::{AgentCommand, ClientRequest, ServiceReply};
pub use service::{SharingService, serve_lines};
