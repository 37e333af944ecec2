//! Error codes shared by every orchestration module.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the orchestration core.
pub type SharingResult<T> = Result<T, SharingErrorCode>;

/// Closed set of error codes returned by orchestration operations.
///
/// Every code has a stable numeric value (see [`SharingErrorCode::code`])
/// so it can travel across the IPC boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SharingErrorCode {
    #[error("general error")]
    GeneralError,
    #[error("service limit reached")]
    ServiceLimit,
    #[error("session creation failed")]
    SessionCreate,
    #[error("agent not found")]
    AgentNotFound,
    #[error("context not found")]
    ContextNotFound,
    #[error("invalid id")]
    InvalidId,
    #[error("target is being destroyed")]
    Destroying,
    #[error("synchronous call timed out")]
    SyncTimeout,
    #[error("event channel closed")]
    ChannelClosed,
    #[error("network error")]
    NetworkError,
    #[error("connection failure")]
    ConnectionFailure,
    #[error("interaction failure")]
    InteractionFailure,
    #[error("protocol interaction timeout")]
    ProtocolInteractionTimeout,
    #[error("intake timeout")]
    IntakeTimeout,
    #[error("unsupported decode format")]
    DecodeFormat,
    #[error("decode error")]
    DecodeError,
    #[error("play start failure")]
    PlayStartFailure,
    #[error("operation not supported")]
    Unsupported,
}

impl SharingErrorCode {
    const BASE: i32 = 10000;

    /// Stable wire value of this code.
    #[must_use]
    pub const fn code(self) -> i32 {
        let offset = match self {
            Self::GeneralError => 1,
            Self::ServiceLimit => 2,
            Self::SessionCreate => 3,
            Self::AgentNotFound => 4,
            Self::ContextNotFound => 5,
            Self::InvalidId => 6,
            Self::Destroying => 7,
            Self::SyncTimeout => 8,
            Self::ChannelClosed => 9,
            Self::NetworkError => 20,
            Self::ConnectionFailure => 21,
            Self::InteractionFailure => 22,
            Self::ProtocolInteractionTimeout => 23,
            Self::IntakeTimeout => 24,
            Self::DecodeFormat => 30,
            Self::DecodeError => 31,
            Self::PlayStartFailure => 32,
            Self::Unsupported => 40,
        };
        Self::BASE + offset
    }

    /// Look a code up by its wire value.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Session errors that force the agent, and eventually its context, down.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::NetworkError
                | Self::ConnectionFailure
                | Self::InteractionFailure
                | Self::ProtocolInteractionTimeout
                | Self::IntakeTimeout
        )
    }

    const ALL: [Self; 18] = [
        Self::GeneralError,
        Self::ServiceLimit,
        Self::SessionCreate,
        Self::AgentNotFound,
        Self::ContextNotFound,
        Self::InvalidId,
        Self::Destroying,
        Self::SyncTimeout,
        Self::ChannelClosed,
        Self::NetworkError,
        Self::ConnectionFailure,
        Self::InteractionFailure,
        Self::ProtocolInteractionTimeout,
        Self::IntakeTimeout,
        Self::DecodeFormat,
        Self::DecodeError,
        Self::PlayStartFailure,
        Self::Unsupported,
    ];
}
