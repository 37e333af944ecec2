//! Agents: one sink or source endpoint of a sharing session.
//!
//! An agent owns exactly one protocol [`Session`] and drives it through the
//! run-step machine. Inbound commands are admitted by [`Agent::check_run_step`];
//! session notifications are translated into status messages and handed to the
//! owning context through a weak [`AgentListener`] back-reference.

use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use sharing_core::{
    AgentListener, AgentType, EventType, INVALID_ID, MediaStatus, ModuleType, RunStep,
    RunningStatus, Session, SessionListener, SharingErrorCode, SharingEvent,
    event::AgentStatusMsg,
    traits::SessionNotify,
};

use crate::session::SessionRegistry;

/// Run-step an inbound event asks for; events with no step map to `Idle`.
#[must_use]
pub const fn run_step_for(event_type: EventType) -> RunStep {
    match event_type {
        EventType::EventAgentStart => RunStep::Start,
        EventType::EventAgentStop => RunStep::Stop,
        EventType::EventAgentPlayStart => RunStep::Play,
        EventType::EventAgentPlayStop => RunStep::PlayStop,
        EventType::EventAgentPause => RunStep::Pause,
        EventType::EventAgentResume => RunStep::Resume,
        EventType::EventAgentDestroy | EventType::EventContextAgentDestroy => RunStep::Destroy,
        EventType::EventAgentChannelAppendsurface => RunStep::AppendSurface,
        EventType::EventAgentChannelRemovesurface => RunStep::RemoveSurface,
        _ => RunStep::Idle,
    }
}

const fn media_status_for(event_type: EventType) -> Option<MediaStatus> {
    match event_type {
        EventType::EventAgentStateProsumerCreate => Some(MediaStatus::Created),
        EventType::EventAgentStateProsumerStart => Some(MediaStatus::Started),
        EventType::EventAgentStateProsumerStop => Some(MediaStatus::Stopped),
        EventType::EventAgentStateProsumerPause => Some(MediaStatus::Paused),
        EventType::EventAgentStateProsumerResume => Some(MediaStatus::Resumed),
        EventType::EventAgentStateProsumerDestroy => Some(MediaStatus::Destroyed),
        _ => None,
    }
}

/// Media channel command for a prosumer notification.
///
/// Sinks drive a consumer, sources a producer.
fn channel_event_for(agent_type: AgentType, notify: &SessionNotify) -> Option<EventType> {
    let event = match (agent_type, notify) {
        (AgentType::SinkAgent, SessionNotify::ProsumerCreate) => EventType::EventMediaConsumerCreate,
        (AgentType::SinkAgent, SessionNotify::ProsumerStart) => EventType::EventMediaConsumerStart,
        (AgentType::SinkAgent, SessionNotify::ProsumerStop) => EventType::EventMediaConsumerStop,
        (AgentType::SinkAgent, SessionNotify::ProsumerPause) => EventType::EventMediaConsumerPause,
        (AgentType::SinkAgent, SessionNotify::ProsumerResume) => EventType::EventMediaConsumerResume,
        (AgentType::SinkAgent, SessionNotify::ProsumerDestroy) => EventType::EventMediaConsumerDestroy,
        (AgentType::SrcAgent, SessionNotify::ProsumerCreate) => EventType::EventMediaProducerCreate,
        (AgentType::SrcAgent, SessionNotify::ProsumerStart) => EventType::EventMediaProducerStart,
        (AgentType::SrcAgent, SessionNotify::ProsumerStop) => EventType::EventMediaProducerStop,
        (AgentType::SrcAgent, SessionNotify::ProsumerPause) => EventType::EventMediaProducerPause,
        (AgentType::SrcAgent, SessionNotify::ProsumerResume) => EventType::EventMediaProducerResume,
        (AgentType::SrcAgent, SessionNotify::ProsumerDestroy) => EventType::EventMediaProducerDestroy,
        _ => return None,
    };
    Some(event)
}

#[derive(Debug, Clone, Copy)]
struct StepState {
    step: RunStep,
    status: RunningStatus,
}

/// One media producer or consumer inside a context.
pub struct Agent {
    id: u32,
    agent_type: AgentType,
    sink_agent_id: u32,
    media_channel_id: AtomicU32,
    destroying: AtomicBool,
    state: Mutex<StepState>,
    session: OnceLock<Box<dyn Session>>,
    listener: OnceLock<Weak<dyn AgentListener>>,
}

impl Agent {
    /// Create a sink agent; its media channel id is assigned once the
    /// channel exists.
    #[must_use]
    pub fn new_sink(id: u32) -> Arc<Self> {
        Arc::new(Self::new(id, AgentType::SinkAgent, INVALID_ID, INVALID_ID))
    }

    /// Create a source agent streaming into `sink_agent_id` over the sink's
    /// media channel.
    #[must_use]
    pub fn new_src(id: u32, sink_agent_id: u32, media_channel_id: u32) -> Arc<Self> {
        Arc::new(Self::new(
            id,
            AgentType::SrcAgent,
            sink_agent_id,
            media_channel_id,
        ))
    }

    fn new(id: u32, agent_type: AgentType, sink_agent_id: u32, media_channel_id: u32) -> Self {
        Self {
            id,
            agent_type,
            sink_agent_id,
            media_channel_id: AtomicU32::new(media_channel_id),
            destroying: AtomicBool::new(false),
            state: Mutex::new(StepState {
                step: RunStep::Idle,
                status: RunningStatus::Idle,
            }),
            session: OnceLock::new(),
            listener: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub const fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    /// Sink this source streams into; `INVALID_ID` for sinks.
    #[must_use]
    pub const fn sink_agent_id(&self) -> u32 {
        self.sink_agent_id
    }

    #[must_use]
    pub fn media_channel_id(&self) -> u32 {
        self.media_channel_id.load(Ordering::Acquire)
    }

    pub fn set_media_channel_id(&self, channel_id: u32) {
        self.media_channel_id.store(channel_id, Ordering::Release);
    }

    #[must_use]
    pub fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::Acquire)
    }

    /// Begin teardown; from now on only destroy-related events are accepted.
    pub fn set_destroying(&self) {
        self.destroying.store(true, Ordering::Release);
    }

    /// Current `(run-step, status)` pair.
    #[must_use]
    pub fn run_state(&self) -> (RunStep, RunningStatus) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.step, state.status)
    }

    /// Install the context that receives this agent's status messages.
    pub fn set_agent_listener(&self, listener: Weak<dyn AgentListener>) {
        if self.listener.set(listener).is_err() {
            tracing::warn!("Agent {} already has a listener", self.id);
        }
    }

    /// Instantiate the protocol session named `class_name`.
    ///
    /// # Errors
    /// Returns `SessionCreate` if the class is unknown or a session already exists.
    pub fn create_session(
        self: &Arc<Self>,
        registry: &SessionRegistry,
        class_name: &str,
    ) -> Result<(), SharingErrorCode> {
        let Some(session) = registry.create(class_name) else {
            tracing::error!("Agent {}: unknown session class {class_name}", self.id);
            return Err(SharingErrorCode::SessionCreate);
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let listener: Weak<dyn SessionListener> = weak;
        session.set_listener(listener);
        self.session
            .set(session)
            .map_err(|_| SharingErrorCode::SessionCreate)?;
        tracing::debug!("Agent {} ({:?}) created {class_name}", self.id, self.agent_type);
        Ok(())
    }

    fn session(&self) -> Result<&dyn Session, SharingErrorCode> {
        self.session.get().map(|session| &**session).ok_or_else(|| {
            tracing::error!("Agent {} has no session", self.id);
            SharingErrorCode::SessionCreate
        })
    }

    /// Admit a transition to `step`.
    ///
    /// Returns `Ok(true)` when the step was entered and the session must be
    /// driven, `Ok(false)` when an in-progress destroy absorbs the request.
    ///
    /// # Errors
    /// Returns `GeneralError` if a step of equal or higher weight is running,
    /// or if the agent is already destroyed.
    pub fn check_run_step(&self, step: RunStep) -> Result<bool, SharingErrorCode> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.step == RunStep::Destroy {
            if step == RunStep::Destroy && state.status == RunningStatus::Done {
                tracing::warn!("Agent {} already destroyed", self.id);
                return Err(SharingErrorCode::GeneralError);
            }
            tracing::debug!("Agent {} is destroying, {step:?} absorbed", self.id);
            return Ok(false);
        }

        if step != RunStep::Destroy
            && state.status == RunningStatus::Running
            && step.weight() <= state.step.weight()
        {
            tracing::warn!(
                "Agent {}: {step:?} rejected while {:?} is running",
                self.id,
                state.step
            );
            return Err(SharingErrorCode::GeneralError);
        }

        state.step = step;
        state.status = RunningStatus::Running;
        Ok(true)
    }

    /// Close the current step with `status`.
    pub fn pop_run_step(&self, status: RunningStatus) -> RunStep {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.status = status;
        state.step
    }

    /// Handle an event addressed to this agent.
    ///
    /// # Errors
    /// Returns `Destroying` for non-destroy events after teardown started,
    /// `GeneralError` for rejected transitions, or the session's error.
    pub fn handle_event(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        if self.is_destroying() && !event.event_type.is_destroy_related() {
            tracing::debug!(
                "Agent {} is destroying, dropping {:?}",
                self.id,
                event.event_type
            );
            return Err(SharingErrorCode::Destroying);
        }

        if let Some(status) = media_status_for(event.event_type) {
            self.session()?.update_media_status(status);
            return Ok(());
        }

        if event.event_type == EventType::EventAgentProsumerError {
            let code = event
                .agent_msg()
                .and_then(|m| m.error_code)
                .or_else(|| event.channel_msg().and_then(|m| m.error_code))
                .unwrap_or(SharingErrorCode::GeneralError);
            self.handle_session_error(code);
            return Ok(());
        }

        let step = run_step_for(event.event_type);
        if step == RunStep::Idle {
            tracing::debug!("Agent {}: no step for {:?}", self.id, event.event_type);
            return Ok(());
        }

        if !self.check_run_step(step)? {
            return Ok(());
        }
        if step == RunStep::Destroy {
            self.set_destroying();
        }

        let session = self.session()?;
        if matches!(step, RunStep::AppendSurface | RunStep::RemoveSurface) {
            if let Err(e) = session.handle_private_event(event) {
                tracing::debug!("Agent {}: session ignored surface event: {e}", self.id);
            }
        }
        session.update_operation(step);
        Ok(())
    }

    /// Classify a session error; fatal codes put the step in `Error` so the
    /// interaction layer tears the agent down.
    pub fn handle_session_error(&self, code: SharingErrorCode) {
        if code.is_fatal() {
            let step = self.pop_run_step(RunningStatus::Error);
            tracing::error!("Agent {} fatal session error in {step:?}: {code}", self.id);
        } else {
            tracing::warn!("Agent {} session error: {code}", self.id);
        }

        let mut msg = self.status_msg(ModuleType::Interaction, EventType::EventInteractionMsgError);
        msg.error_code = Some(code);
        self.report(msg);
    }

    /// Route a status message to its target module through the owning context.
    ///
    /// # Errors
    /// Returns `GeneralError` for targets outside MediaChannel, Context and
    /// Interaction, or when the context is gone.
    pub fn notify_private_event(&self, msg: AgentStatusMsg) -> Result<(), SharingErrorCode> {
        match msg.to_module {
            ModuleType::MediaChannel | ModuleType::Context | ModuleType::Interaction => {}
            other => {
                tracing::error!("Agent {}: cannot notify module {other:?}", self.id);
                return Err(SharingErrorCode::GeneralError);
            }
        }
        let Some(listener) = self.listener.get().and_then(Weak::upgrade) else {
            tracing::warn!("Agent {}: context gone, dropping {:?}", self.id, msg.event_type);
            return Err(SharingErrorCode::GeneralError);
        };
        listener.on_agent_notify(msg)
    }

    fn status_msg(&self, to_module: ModuleType, event_type: EventType) -> AgentStatusMsg {
        AgentStatusMsg {
            agent_id: self.id,
            agent_type: self.agent_type,
            to_module,
            event_type,
            error_code: None,
            step: None,
            detail: None,
        }
    }

    fn report(&self, msg: AgentStatusMsg) {
        if let Err(e) = self.notify_private_event(msg) {
            tracing::debug!("Agent {} notification not delivered: {e}", self.id);
        }
    }

    fn step_done(&self) {
        let step = self.pop_run_step(RunningStatus::Done);
        let mut msg = self.status_msg(
            ModuleType::Interaction,
            EventType::EventInteractionStateAgentStepDone,
        );
        msg.step = Some(step);
        self.report(msg);
    }

    fn session_destroyed(&self) {
        self.pop_run_step(RunningStatus::Done);
        tracing::info!("Agent {} ({:?}) session destroyed", self.id, self.agent_type);
        let msg = match self.agent_type {
            AgentType::SinkAgent => {
                self.status_msg(ModuleType::MediaChannel, EventType::EventMediaChannelDestroy)
            }
            AgentType::SrcAgent => {
                self.status_msg(ModuleType::Context, EventType::EventContextStateAgentDestroy)
            }
        };
        self.report(msg);
    }
}

impl SessionListener for Agent {
    fn on_session_notify(&self, notify: SessionNotify) {
        if let Some(event_type) = channel_event_for(self.agent_type, &notify) {
            self.report(self.status_msg(ModuleType::MediaChannel, event_type));
            return;
        }

        match notify {
            SessionNotify::SessionStarted
            | SessionNotify::SessionStopped
            | SessionNotify::SessionPaused
            | SessionNotify::SessionResumed
            | SessionNotify::StepDone(_) => self.step_done(),
            SessionNotify::SessionDestroyed => self.session_destroyed(),
            SessionNotify::SessionInterrupted => {
                let step = self.pop_run_step(RunningStatus::Done);
                tracing::info!("Agent {} interrupted during {step:?}", self.id);
            }
            SessionNotify::Error(code) => self.handle_session_error(code),
            SessionNotify::PrivateEvent {
                to_module,
                event_type,
                detail,
            } => {
                let mut msg = self.status_msg(to_module, event_type);
                msg.detail = detail;
                if let Err(e) = self.notify_private_event(msg) {
                    tracing::warn!("Agent {} private event rejected: {e}", self.id);
                }
            }
            SessionNotify::ProsumerCreate
            | SessionNotify::ProsumerStart
            | SessionNotify::ProsumerStop
            | SessionNotify::ProsumerPause
            | SessionNotify::ProsumerResume
            | SessionNotify::ProsumerDestroy => {}
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (step, status) = self.run_state();
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("sink_agent_id", &self.sink_agent_id)
            .field("media_channel_id", &self.media_channel_id())
            .field("destroying", &self.is_destroying())
            .field("step", &step)
            .field("status", &status)
            .finish_non_exhaustive()
    }
}
