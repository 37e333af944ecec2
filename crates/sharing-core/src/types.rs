//! Small value types shared by agents, contexts and their collaborators.

use serde::{Deserialize, Serialize};

/// Sentinel for "not yet assigned"; never used to index a live collection.
pub const INVALID_ID: u32 = u32::MAX;

/// Role of an agent inside a sharing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    /// Receiving/rendering side.
    SinkAgent,
    /// Producing side, always attached to one sink.
    SrcAgent,
}

/// Position of an agent in its lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStep {
    Idle,
    Start,
    AppendSurface,
    RemoveSurface,
    Play,
    PlayStop,
    Stop,
    Pause,
    Resume,
    Destroy,
}

impl RunStep {
    const WEIGHT_IDLE: u8 = 0;
    const WEIGHT_REUSABLE: u8 = 1;
    const WEIGHT_START: u8 = 2;
    const WEIGHT_DESTROY: u8 = 3;

    /// Priority used to resolve racing steps; higher pre-empts lower.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Idle => Self::WEIGHT_IDLE,
            Self::AppendSurface
            | Self::RemoveSurface
            | Self::Play
            | Self::PlayStop
            | Self::Stop
            | Self::Pause
            | Self::Resume => Self::WEIGHT_REUSABLE,
            Self::Start => Self::WEIGHT_START,
            Self::Destroy => Self::WEIGHT_DESTROY,
        }
    }
}

/// Execution status of the current run-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunningStatus {
    Idle,
    Running,
    Done,
    Error,
    Interrupt,
}

/// Prosumer state reported back by the media channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    Created,
    Started,
    Stopped,
    Paused,
    Resumed,
    Destroyed,
}
