//! Ports between the orchestration core and its collaborators.

use std::{sync::Weak, time::Duration};

use crate::{
    SharingErrorCode, SharingEvent,
    event::{AgentStatusMsg, ModuleType, EventType},
    types::{MediaStatus, RunStep},
};

/// Delivers events between modules.
///
/// `post` is fire-and-forget and must never call back into the sender on the
/// same stack; `send_sync` is the one blocking round trip in the core.
pub trait EventRouter: Send + Sync {
    /// Queue an event for the module named by `event.to_module`.
    fn post(&self, event: SharingEvent);

    /// Send and block until the target replies or `timeout` elapses.
    ///
    /// # Errors
    /// Returns `SyncTimeout` on timeout, or the error the target replied with.
    fn send_sync(
        &self,
        event: SharingEvent,
        timeout: Duration,
    ) -> Result<SharingEvent, SharingErrorCode>;
}

/// A module living outside the orchestration core (media channel, interaction).
pub trait ModuleEndpoint: Send + Sync {
    /// Module this endpoint serves.
    fn module(&self) -> ModuleType;

    /// Handle a fire-and-forget event.
    fn on_event(&self, event: SharingEvent);

    /// Handle a synchronous request and produce the reply envelope.
    ///
    /// # Errors
    /// Returns the error code to surface to the blocked caller.
    fn on_sync_event(&self, event: SharingEvent) -> Result<SharingEvent, SharingErrorCode>;
}

/// Platform audio routing, reset when the last context goes away.
pub trait AudioRouting: Send + Sync {
    fn reset_default_routing(&self);
}

/// Audio routing that does nothing; for hosts without a platform mixer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudioRouting;

impl AudioRouting for NoAudioRouting {
    fn reset_default_routing(&self) {}
}

/// Notification posted by a session to its owning agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotify {
    ProsumerCreate,
    ProsumerStart,
    ProsumerStop,
    ProsumerPause,
    ProsumerResume,
    ProsumerDestroy,
    SessionStarted,
    SessionStopped,
    SessionPaused,
    SessionResumed,
    SessionDestroyed,
    SessionInterrupted,
    /// Current step finished without a dedicated session state.
    StepDone(RunStep),
    Error(SharingErrorCode),
    /// Session-private status routed to another module.
    PrivateEvent {
        to_module: ModuleType,
        event_type: EventType,
        detail: Option<String>,
    },
}

/// Receives session notifications; implemented by agents.
pub trait SessionListener: Send + Sync {
    fn on_session_notify(&self, notify: SessionNotify);
}

/// Protocol session owned by an agent (e.g. a wireless-display sink session).
pub trait Session: Send + Sync {
    /// Install the back-reference used for notifications.
    fn set_listener(&self, listener: Weak<dyn SessionListener>);

    /// Drive the session into the given run-step.
    fn update_operation(&self, step: RunStep);

    /// Media channel reported a prosumer state change.
    fn update_media_status(&self, status: MediaStatus);

    /// Event addressed to the session itself.
    ///
    /// # Errors
    /// Returns error if the session cannot handle the event.
    fn handle_private_event(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        let _ = event;
        Err(SharingErrorCode::Unsupported)
    }
}

/// Receives agent status changes; implemented by contexts.
pub trait AgentListener: Send + Sync {
    /// Route an agent status message.
    ///
    /// # Errors
    /// Returns `GeneralError` for modules outside the routing whitelist.
    fn on_agent_notify(&self, msg: AgentStatusMsg) -> Result<(), SharingErrorCode>;
}
