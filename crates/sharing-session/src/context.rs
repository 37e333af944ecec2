//! A context owns the agents of one sharing session.
//!
//! Creation and teardown are sequenced here: a sink is only destroyed once
//! every source streaming into it has reported its own destruction.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use sharing_core::{
    AgentListener, AgentType, EventPayload, EventRouter, EventType, INVALID_ID, IdGenerator,
    ModuleType, SharingErrorCode, SharingEvent,
    event::{AgentStatusMsg, ChannelEventMsg, ContextEventMsg, InteractionEventMsg},
};

use crate::{agent::Agent, session::SessionRegistry};

/// Bound on the blocking media channel round trip during sink creation.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(3);

/// Collaborators shared by the manager and every context it creates.
#[derive(Clone)]
pub struct ContextDeps {
    pub router: Arc<dyn EventRouter>,
    pub sessions: SessionRegistry,
    pub ids: Arc<IdGenerator>,
    pub sync_timeout: Duration,
}

impl std::fmt::Debug for ContextDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDeps")
            .field("sessions", &self.sessions)
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

/// Agents of one sharing session: one sink and the sources attached to it.
pub struct Context {
    id: u32,
    agents: Mutex<HashMap<u32, Arc<Agent>>>,
    interaction_id: AtomicU32,
    destroying: AtomicBool,
    deps: ContextDeps,
    me: Weak<Self>,
}

impl Context {
    #[must_use]
    pub fn new(id: u32, deps: ContextDeps) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            agents: Mutex::new(HashMap::new()),
            interaction_id: AtomicU32::new(INVALID_ID),
            destroying: AtomicBool::new(false),
            deps,
            me: me.clone(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::Acquire)
    }

    /// Interaction endpoint that sent the latest request.
    #[must_use]
    pub fn interaction_id(&self) -> u32 {
        self.interaction_id.load(Ordering::Acquire)
    }

    fn lock_agents(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<Agent>>> {
        self.agents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get_agent(&self, agent_id: u32) -> Option<Arc<Agent>> {
        if agent_id == INVALID_ID {
            return None;
        }
        self.lock_agents().get(&agent_id).cloned()
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.lock_agents().len()
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.count_of(AgentType::SinkAgent)
    }

    #[must_use]
    pub fn src_count(&self) -> usize {
        self.count_of(AgentType::SrcAgent)
    }

    fn count_of(&self, agent_type: AgentType) -> usize {
        self.lock_agents()
            .values()
            .filter(|a| a.agent_type() == agent_type)
            .count()
    }

    #[must_use]
    pub fn is_empty_agent(&self) -> bool {
        self.lock_agents().is_empty()
    }

    /// True when no source still streams into `sink_id`.
    #[must_use]
    pub fn is_empty_src_agent(&self, sink_id: u32) -> bool {
        !has_src_of(&self.lock_agents(), sink_id)
    }

    /// Handle an event addressed to this context. Agent ids minted during
    /// creation are written back into the payload.
    ///
    /// # Errors
    /// Returns `Destroying` once the context is being released, or the error
    /// of the operation the event requested.
    pub fn handle_event(&self, event: &mut SharingEvent) -> Result<(), SharingErrorCode> {
        if self.is_destroying() {
            tracing::warn!("Context {} is destroying, dropping {:?}", self.id, event.event_type);
            return Err(SharingErrorCode::Destroying);
        }
        self.cache_interaction(event);

        match event.event_type {
            EventType::EventContextAgentCreate => {
                let Some(msg) = event.context_msg_mut() else {
                    tracing::error!("Context {}: agent create without context payload", self.id);
                    return Err(SharingErrorCode::GeneralError);
                };
                match self.handle_create_agent(msg) {
                    Ok(agent_id) => {
                        msg.agent_id = agent_id;
                        Ok(())
                    }
                    Err(e) => {
                        msg.agent_id = INVALID_ID;
                        Err(e)
                    }
                }
            }
            EventType::EventContextAgentDestroy | EventType::EventAgentDestroy => {
                self.handle_agent_destroy(event)
            }
            EventType::EventContextStateAgentDestroy => self.handle_state_destroy_agent(event),
            _ => self.distribute_event(event),
        }
    }

    fn cache_interaction(&self, event: &SharingEvent) {
        let from_msg = event
            .context_msg()
            .map_or(INVALID_ID, |m| m.interaction_id);
        let id = if from_msg != INVALID_ID {
            from_msg
        } else if event.from_module == ModuleType::Interaction {
            event.src_id
        } else {
            INVALID_ID
        };
        if id != INVALID_ID {
            self.interaction_id.store(id, Ordering::Release);
        }
    }

    /// Create and publish an agent.
    ///
    /// # Errors
    /// Returns `SessionCreate` for an unknown class, the media channel error
    /// for sinks, and `AgentNotFound`/`Destroying` for sources whose sink is
    /// missing or already tearing down.
    pub fn handle_create_agent(&self, msg: &ContextEventMsg) -> Result<u32, SharingErrorCode> {
        let agent = match msg.agent_type {
            AgentType::SinkAgent => {
                let agent = Agent::new_sink(self.deps.ids.next_id());
                agent.create_session(&self.deps.sessions, &msg.class_name)?;
                let channel_id = self.create_media_channel(agent.id())?;
                agent.set_media_channel_id(channel_id);
                agent
            }
            AgentType::SrcAgent => {
                let sink = self.live_sink(msg.sink_agent_id)?;
                let agent = Agent::new_src(
                    self.deps.ids.next_id(),
                    sink.id(),
                    sink.media_channel_id(),
                );
                agent.create_session(&self.deps.sessions, &msg.class_name)?;
                agent
            }
        };

        let listener: Weak<dyn AgentListener> = self.me.clone();
        agent.set_agent_listener(listener);

        let agent_id = agent.id();
        {
            let mut agents = self.lock_agents();
            if agent.agent_type() == AgentType::SrcAgent {
                // The sink may have started tearing down while the session was built.
                let sink_alive = agents
                    .get(&agent.sink_agent_id())
                    .is_some_and(|sink| !sink.is_destroying());
                if !sink_alive {
                    tracing::warn!(
                        "Context {}: sink {} went away during source creation",
                        self.id,
                        agent.sink_agent_id()
                    );
                    return Err(SharingErrorCode::Destroying);
                }
            }
            agents.insert(agent_id, Arc::clone(&agent));
        }

        tracing::info!(
            "Context {}: created {:?} {agent_id} on channel {}",
            self.id,
            agent.agent_type(),
            agent.media_channel_id()
        );
        Ok(agent_id)
    }

    fn live_sink(&self, sink_id: u32) -> Result<Arc<Agent>, SharingErrorCode> {
        let sink = self
            .get_agent(sink_id)
            .filter(|a| a.agent_type() == AgentType::SinkAgent)
            .ok_or_else(|| {
                tracing::error!("Context {}: sink {sink_id} not found", self.id);
                SharingErrorCode::AgentNotFound
            })?;
        if sink.is_destroying() {
            tracing::warn!("Context {}: sink {sink_id} is destroying", self.id);
            return Err(SharingErrorCode::Destroying);
        }
        Ok(sink)
    }

    /// Blocking round trip to the media channel; the reply's `dst_id` is the
    /// new channel id.
    fn create_media_channel(&self, agent_id: u32) -> Result<u32, SharingErrorCode> {
        let request = SharingEvent::new(
            EventType::EventMediaChannelCreate,
            ModuleType::Context,
            ModuleType::MediaChannel,
            EventPayload::Channel(ChannelEventMsg {
                agent_id,
                channel_id: INVALID_ID,
                prosumer_id: agent_id,
                error_code: None,
            }),
        )
        .with_src(self.id);

        let reply = self
            .deps
            .router
            .send_sync(request, self.deps.sync_timeout)
            .inspect_err(|e| {
                tracing::error!("Context {}: media channel create failed: {e}", self.id);
            })?;

        if let Some(code) = reply.channel_msg().and_then(|m| m.error_code) {
            return Err(code);
        }
        let channel_id = if reply.dst_id == INVALID_ID {
            reply.channel_msg().map_or(INVALID_ID, |m| m.channel_id)
        } else {
            reply.dst_id
        };
        if channel_id == INVALID_ID {
            tracing::error!("Context {}: media channel reply carried no id", self.id);
            return Err(SharingErrorCode::GeneralError);
        }
        Ok(channel_id)
    }

    /// Destroy a source directly; for a sink, destroy its sources first.
    ///
    /// # Errors
    /// Returns `InvalidId` if the event names no agent.
    pub fn handle_agent_destroy(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        let agent_id = event.agent_id().ok_or(SharingErrorCode::InvalidId)?;

        let targets: Vec<Arc<Agent>> = {
            let agents = self.lock_agents();
            let Some(agent) = agents.get(&agent_id).cloned() else {
                tracing::error!("Context {}: destroy for unknown agent {agent_id}", self.id);
                return Ok(());
            };
            match agent.agent_type() {
                AgentType::SrcAgent => vec![agent],
                AgentType::SinkAgent => {
                    agent.set_destroying();
                    if has_src_of(&agents, agent_id) {
                        agents
                            .values()
                            .filter(|a| a.agent_type() == AgentType::SrcAgent)
                            .cloned()
                            .collect()
                    } else {
                        vec![agent]
                    }
                }
            }
        };

        for target in targets {
            tracing::debug!("Context {}: destroying agent {}", self.id, target.id());
            if let Err(e) = target.handle_event(event) {
                tracing::warn!("Context {}: agent {} destroy: {e}", self.id, target.id());
            }
        }
        Ok(())
    }

    /// An agent finished destroying: unpublish it, cascade to its sink and
    /// tell the requester.
    ///
    /// # Errors
    /// Returns `InvalidId` if the event names no agent, or `GeneralError` if a
    /// sink reports completion while sources still depend on it.
    pub fn handle_state_destroy_agent(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        let agent_id = event.agent_id().ok_or(SharingErrorCode::InvalidId)?;

        let removed = {
            let mut agents = self.lock_agents();
            let Some(agent) = agents.get(&agent_id) else {
                tracing::error!("Context {}: state destroy for unknown agent {agent_id}", self.id);
                return Ok(());
            };
            if agent.agent_type() == AgentType::SinkAgent && has_src_of(&agents, agent_id) {
                tracing::error!("Context {}: sink {agent_id} still has sources", self.id);
                return Err(SharingErrorCode::GeneralError);
            }
            agents.remove(&agent_id)
        };
        let Some(agent) = removed else {
            return Ok(());
        };
        tracing::info!("Context {}: agent {agent_id} removed", self.id);

        if agent.agent_type() == AgentType::SrcAgent {
            self.check_need_destroy_sink(agent.sink_agent_id());
        }

        self.post_interaction(
            EventType::EventInteractionStateAgentDestroyed,
            InteractionEventMsg {
                context_id: self.id,
                agent_id,
                agent_type: agent.agent_type(),
                error_code: None,
                step: None,
                detail: None,
            },
        );
        Ok(())
    }

    /// Destroy `sink_id` if it is waiting for teardown and has no sources left.
    pub fn check_need_destroy_sink(&self, sink_id: u32) {
        let sink = {
            let agents = self.lock_agents();
            let Some(sink) = agents.get(&sink_id) else {
                return;
            };
            if !sink.is_destroying() || has_src_of(&agents, sink_id) {
                return;
            }
            Arc::clone(sink)
        };

        tracing::info!("Context {}: last source gone, destroying sink {sink_id}", self.id);
        let event = SharingEvent::new(
            EventType::EventContextAgentDestroy,
            ModuleType::Context,
            ModuleType::Context,
            EventPayload::Context(ContextEventMsg::for_agent(sink_id, AgentType::SinkAgent)),
        )
        .with_src(self.id)
        .with_dst(self.id);
        if let Err(e) = sink.handle_event(&event) {
            tracing::warn!("Context {}: sink {sink_id} destroy: {e}", self.id);
        }
    }

    fn distribute_event(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        let Some(agent_id) = event.agent_id() else {
            tracing::error!("Context {}: {:?} carries no agent id", self.id, event.event_type);
            return Ok(());
        };
        let Some(agent) = self.get_agent(agent_id) else {
            tracing::error!(
                "Context {}: agent {agent_id} not found for {:?}",
                self.id,
                event.event_type
            );
            return Ok(());
        };
        agent.handle_event(event)
    }

    /// Tear the context down without the cascading path.
    pub fn release(&self) {
        self.destroying.store(true, Ordering::Release);
        let mut agents = self.lock_agents();
        if !agents.is_empty() {
            tracing::warn!(
                "Context {} released with {} agents still alive",
                self.id,
                agents.len()
            );
        }
        agents.clear();
    }

    fn post_interaction(&self, event_type: EventType, msg: InteractionEventMsg) {
        let event = SharingEvent::new(
            event_type,
            ModuleType::Context,
            ModuleType::Interaction,
            EventPayload::Interaction(msg),
        )
        .with_src(self.id)
        .with_dst(self.interaction_id());
        self.deps.router.post(event);
    }
}

fn has_src_of(agents: &HashMap<u32, Arc<Agent>>, sink_id: u32) -> bool {
    agents
        .values()
        .any(|a| a.agent_type() == AgentType::SrcAgent && a.sink_agent_id() == sink_id)
}

impl AgentListener for Context {
    fn on_agent_notify(&self, msg: AgentStatusMsg) -> Result<(), SharingErrorCode> {
        match msg.to_module {
            ModuleType::MediaChannel => {
                let channel_id = self
                    .get_agent(msg.agent_id)
                    .map_or(INVALID_ID, |a| a.media_channel_id());
                let event = SharingEvent::new(
                    msg.event_type,
                    ModuleType::Context,
                    ModuleType::MediaChannel,
                    EventPayload::Channel(ChannelEventMsg {
                        agent_id: msg.agent_id,
                        channel_id,
                        prosumer_id: msg.agent_id,
                        error_code: msg.error_code,
                    }),
                )
                .with_src(self.id)
                .with_dst(channel_id);
                self.deps.router.post(event);
            }
            ModuleType::Context => {
                let mut payload = ContextEventMsg::for_agent(msg.agent_id, msg.agent_type);
                payload.interaction_id = self.interaction_id();
                let event = SharingEvent::new(
                    msg.event_type,
                    ModuleType::Context,
                    ModuleType::ContextManager,
                    EventPayload::Context(payload),
                )
                .with_src(self.id)
                .with_dst(self.id);
                self.deps.router.post(event);
            }
            ModuleType::Interaction => self.post_interaction(
                msg.event_type,
                InteractionEventMsg {
                    context_id: self.id,
                    agent_id: msg.agent_id,
                    agent_type: msg.agent_type,
                    error_code: msg.error_code,
                    step: msg.step,
                    detail: msg.detail,
                },
            ),
            other => {
                tracing::error!("Context {}: no route to {other:?}", self.id);
                return Err(SharingErrorCode::GeneralError);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("agents", &self.agent_count())
            .field("interaction_id", &self.interaction_id())
            .field("destroying", &self.is_destroying())
            .finish_non_exhaustive()
    }
}
