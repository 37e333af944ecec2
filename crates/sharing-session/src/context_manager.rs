//! Process-wide owner of all contexts and the global agent quotas.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use sharing_core::{
    AgentLimits, AgentType, EventPayload, EventRouter, EventType, INVALID_ID, IdGenerator,
    JsonConfig, ModuleType, SharingErrorCode, SharingEvent,
    config::network_log_on,
    traits::AudioRouting,
};

use crate::{
    context::{Context, ContextDeps, DEFAULT_SYNC_TIMEOUT},
    session::SessionRegistry,
};

/// Creations that passed the quota check but whose agent is not in a context yet.
#[derive(Debug, Default)]
struct PendingAgents {
    sink: AtomicUsize,
    src: AtomicUsize,
}

impl PendingAgents {
    const fn counter(&self, agent_type: AgentType) -> &AtomicUsize {
        match agent_type {
            AgentType::SinkAgent => &self.sink,
            AgentType::SrcAgent => &self.src,
        }
    }
}

/// Quota slot held for the duration of one agent creation.
struct AgentSlot<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for AgentSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Entry point for every orchestration event.
pub struct ContextManager {
    deps: ContextDeps,
    audio_routing: Arc<dyn AudioRouting>,
    config: RwLock<JsonConfig>,
    limits: RwLock<AgentLimits>,
    log_on: AtomicBool,
    contexts: Mutex<HashMap<u32, Arc<Context>>>,
    pending: PendingAgents,
}

impl ContextManager {
    /// Create a manager with default limits; call [`Self::init`] to load
    /// configuration.
    #[must_use]
    pub fn new(
        router: Arc<dyn EventRouter>,
        audio_routing: Arc<dyn AudioRouting>,
        sessions: SessionRegistry,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            deps: ContextDeps {
                router,
                sessions,
                ids,
                sync_timeout: DEFAULT_SYNC_TIMEOUT,
            },
            audio_routing,
            config: RwLock::new(JsonConfig::new()),
            limits: RwLock::new(AgentLimits::default()),
            log_on: AtomicBool::new(false),
            contexts: Mutex::new(HashMap::new()),
            pending: PendingAgents::default(),
        }
    }

    /// Bound the media channel round trip made while creating sinks.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.deps.sync_timeout = timeout;
        self
    }

    /// Load limits and the network log flag. Calling again reloads.
    pub fn init(&self, config: &JsonConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.apply_config(config);
    }

    fn apply_config(&self, config: &JsonConfig) {
        let limits = AgentLimits::from_config(config);
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = limits;
        if let Some(on) = network_log_on(config) {
            self.log_on.store(on, Ordering::Release);
        }
        tracing::info!(
            "Context limits: {} contexts, {} sinks, {} sources",
            limits.max_context,
            limits.max_sink_agent,
            limits.max_src_agent
        );
    }

    #[must_use]
    pub fn limits(&self) -> AgentLimits {
        *self.limits.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn network_log_enabled(&self) -> bool {
        self.log_on.load(Ordering::Acquire)
    }

    fn lock_contexts(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<Context>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get_context(&self, context_id: u32) -> Option<Arc<Context>> {
        if context_id == INVALID_ID {
            return None;
        }
        self.lock_contexts().get(&context_id).cloned()
    }

    #[must_use]
    pub fn context_count(&self) -> usize {
        self.lock_contexts().len()
    }

    /// Handle an inbound event. Ids produced by the operation (context id in
    /// `dst_id`, agent id in the payload) are written back into `event` so it
    /// can serve as the reply.
    ///
    /// # Errors
    /// Returns `ServiceLimit` when a quota is reached, `ContextNotFound` for an
    /// explicit unknown context, or the error of the forwarded operation.
    pub fn handle_event(&self, event: &mut SharingEvent) -> Result<(), SharingErrorCode> {
        match event.event_type {
            EventType::EventConfigureContext => {
                self.handle_configure(event);
                Ok(())
            }
            EventType::EventContextmgrCreate => {
                let context = self.create_context()?;
                event.dst_id = context.id();
                Ok(())
            }
            EventType::EventContextmgrAgentCreate => self.handle_agent_create(event),
            EventType::EventContextmgrStateChannelDestroy => self.handle_channel_destroyed(event),
            _ => self.forward(event),
        }
    }

    fn handle_configure(&self, event: &SharingEvent) {
        let EventPayload::Configure(msg) = &event.payload else {
            tracing::warn!("Configure event without configuration payload");
            return;
        };
        let push = match JsonConfig::from_value(msg.data.clone()) {
            Ok(push) => push,
            Err(e) => {
                tracing::error!("Invalid configuration push: {e}");
                return;
            }
        };
        let merged = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            config.merge(&push);
            config.clone()
        };
        self.apply_config(&merged);
    }

    fn handle_agent_create(&self, event: &mut SharingEvent) -> Result<(), SharingErrorCode> {
        let Some(msg) = event.context_msg() else {
            tracing::error!("Agent create without context payload");
            return Err(SharingErrorCode::GeneralError);
        };
        let agent_type = msg.agent_type;
        // Held until the agent is in its context or creation failed.
        let Some(_slot) = self.reserve_agent_slot(agent_type) else {
            tracing::warn!("{agent_type:?} quota reached, creation rejected");
            return Err(SharingErrorCode::ServiceLimit);
        };

        let lazily_created = event.dst_id == INVALID_ID;
        let context = if lazily_created {
            self.create_context()?
        } else {
            self.get_context(event.dst_id).ok_or_else(|| {
                tracing::error!("Context {} not found", event.dst_id);
                SharingErrorCode::ContextNotFound
            })?
        };

        let mut forward = event.clone();
        forward.event_type = EventType::EventContextAgentCreate;
        forward.to_module = ModuleType::Context;
        forward.dst_id = context.id();
        let result = context.handle_event(&mut forward);

        event.dst_id = context.id();
        if let (Some(reply), Some(created)) = (event.context_msg_mut(), forward.context_msg()) {
            reply.agent_id = created.agent_id;
        }

        if result.is_err() && lazily_created && context.is_empty_agent() {
            self.destroy_context(context.id());
            event.dst_id = INVALID_ID;
        }
        result
    }

    fn handle_channel_destroyed(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        let Some(context) = self.get_context(event.dst_id) else {
            tracing::error!("Channel destroyed for unknown context {}", event.dst_id);
            return Ok(());
        };

        let mut forward = event.clone();
        forward.event_type = EventType::EventContextStateAgentDestroy;
        forward.to_module = ModuleType::Context;
        let result = context.handle_event(&mut forward);

        if context.is_empty_agent() {
            self.destroy_context(context.id());
        }
        result
    }

    fn forward(&self, event: &mut SharingEvent) -> Result<(), SharingErrorCode> {
        if event.dst_id == INVALID_ID {
            tracing::error!("{:?} has no context id", event.event_type);
            return Ok(());
        }
        let Some(context) = self.get_context(event.dst_id) else {
            tracing::error!("Context {} not found for {:?}", event.dst_id, event.event_type);
            return Ok(());
        };
        context.handle_event(event)
    }

    /// True when one more agent of `agent_type` fits in the global quota.
    /// Creations still in flight count against the quota.
    #[must_use]
    pub fn check_agent_size(&self, agent_type: AgentType) -> bool {
        let limit = self.agent_limit(agent_type);
        let contexts = self.lock_contexts();
        self.agents_in_use(&contexts, agent_type) < limit
    }

    /// Check the quota and claim a slot in one step under the contexts lock.
    fn reserve_agent_slot(&self, agent_type: AgentType) -> Option<AgentSlot<'_>> {
        let limit = self.agent_limit(agent_type);
        let contexts = self.lock_contexts();
        if self.agents_in_use(&contexts, agent_type) >= limit {
            return None;
        }
        let counter = self.pending.counter(agent_type);
        counter.fetch_add(1, Ordering::AcqRel);
        Some(AgentSlot { counter })
    }

    fn agent_limit(&self, agent_type: AgentType) -> usize {
        let limits = self.limits();
        let limit = match agent_type {
            AgentType::SinkAgent => limits.max_sink_agent,
            AgentType::SrcAgent => limits.max_src_agent,
        };
        usize::try_from(limit).unwrap_or(usize::MAX)
    }

    fn agents_in_use(&self, contexts: &HashMap<u32, Arc<Context>>, agent_type: AgentType) -> usize {
        let alive: usize = match agent_type {
            AgentType::SinkAgent => contexts.values().map(|c| c.sink_count()).sum(),
            AgentType::SrcAgent => contexts.values().map(|c| c.src_count()).sum(),
        };
        let pending = self.pending.counter(agent_type).load(Ordering::Acquire);
        tracing::debug!("{agent_type:?} count {alive}, {pending} being created");
        alive + pending
    }

    fn create_context(&self) -> Result<Arc<Context>, SharingErrorCode> {
        let max_context = self.limits().max_context;
        let mut contexts = self.lock_contexts();
        if contexts.len() >= usize::try_from(max_context).unwrap_or(usize::MAX) {
            tracing::warn!("Context quota {max_context} reached");
            return Err(SharingErrorCode::ServiceLimit);
        }
        let context = Context::new(self.deps.ids.next_id(), self.deps.clone());
        contexts.insert(context.id(), Arc::clone(&context));
        tracing::info!("Context {} created", context.id());
        Ok(context)
    }

    /// Remove and release a context. The last one out resets the default
    /// audio routing.
    pub fn destroy_context(&self, context_id: u32) -> bool {
        let (removed, now_empty) = {
            let mut contexts = self.lock_contexts();
            let removed = contexts.remove(&context_id);
            (removed, contexts.is_empty())
        };
        let Some(context) = removed else {
            tracing::warn!("Context {context_id} already gone");
            return false;
        };
        context.release();
        tracing::info!("Context {context_id} destroyed");

        if now_empty {
            tracing::info!("No contexts left, resetting default audio routing");
            self.audio_routing.reset_default_routing();
        }
        true
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("contexts", &self.context_count())
            .field("limits", &self.limits())
            .field("log_on", &self.network_log_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, atomic::AtomicUsize};

    use serde_json::json;
    use sharing_core::event::{AgentEventMsg, ConfigEventMsg, ContextEventMsg};

    use super::*;
    use sharing_core::MediaStatus;

    use crate::test_support::{LOOPBACK_CLASS, RecordingRouter, loopback_registry_recording};

    #[derive(Default)]
    struct CountingAudio(AtomicUsize);

    impl AudioRouting for CountingAudio {
        fn reset_default_routing(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        manager: ContextManager,
        router: Arc<RecordingRouter>,
        audio: Arc<CountingAudio>,
        media: Arc<Mutex<Vec<MediaStatus>>>,
        interaction: Vec<SharingEvent>,
    }

    impl Harness {
        fn new(config: serde_json::Value) -> Self {
            let router = Arc::new(RecordingRouter::default());
            let audio = Arc::new(CountingAudio::default());
            let (sessions, media) = loopback_registry_recording();
            let manager = ContextManager::new(
                Arc::clone(&router) as Arc<dyn EventRouter>,
                Arc::clone(&audio) as Arc<dyn AudioRouting>,
                sessions,
                Arc::new(IdGenerator::new()),
            );
            manager.init(&JsonConfig::from_value(config).unwrap());
            Self {
                manager,
                router,
                audio,
                media,
                interaction: Vec::new(),
            }
        }

        /// Deliver queued events until nothing is left, answering for the
        /// media channel and recording what reaches the interaction layer.
        fn pump(&mut self) {
            while let Some(mut event) = self.router.pop() {
                match event.to_module {
                    ModuleType::ContextManager => {
                        let _ = self.manager.handle_event(&mut event);
                    }
                    ModuleType::MediaChannel => {
                        if let Some(reply) = RecordingRouter::media_channel_reply(&event) {
                            self.router.post(reply);
                        }
                    }
                    ModuleType::Interaction => self.interaction.push(event),
                    other => panic!("unexpected target {other:?}"),
                }
            }
        }

        fn create_agent(
            &mut self,
            context_id: u32,
            agent_type: AgentType,
            sink: u32,
        ) -> Result<(u32, u32), SharingErrorCode> {
            let mut event = agent_create_event(context_id, agent_type, sink);
            let result = self.manager.handle_event(&mut event);
            self.pump();
            result.map(|()| (event.dst_id, event.agent_id().unwrap()))
        }

        fn command(&mut self, context_id: u32, agent_id: u32, event_type: EventType) {
            let mut event = SharingEvent::new(
                event_type,
                ModuleType::Interaction,
                ModuleType::ContextManager,
                EventPayload::Agent(AgentEventMsg::new(agent_id)),
            )
            .with_src(1)
            .with_dst(context_id);
            let _ = self.manager.handle_event(&mut event);
        }

        fn destroyed(&self) -> Vec<u32> {
            self.interaction
                .iter()
                .filter(|e| e.event_type == EventType::EventInteractionStateAgentDestroyed)
                .filter_map(SharingEvent::agent_id)
                .collect()
        }
    }

    fn agent_create_event(context_id: u32, agent_type: AgentType, sink: u32) -> SharingEvent {
        let mut msg = ContextEventMsg::create(LOOPBACK_CLASS, agent_type);
        msg.sink_agent_id = sink;
        SharingEvent::new(
            EventType::EventContextmgrAgentCreate,
            ModuleType::Interaction,
            ModuleType::ContextManager,
            EventPayload::Context(msg),
        )
        .with_src(1)
        .with_dst(context_id)
    }

    #[test]
    fn test_concurrent_sink_creates_respect_quota() {
        let h = Harness::new(json!({ "context": { "agentLimit": { "maxSinkAgent": 1 } } }));
        h.router.delay_sync(Duration::from_millis(200));

        let barrier = &Barrier::new(2);
        let manager = &h.manager;
        let results: Vec<_> = std::thread::scope(|s| {
            let threads: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        let mut event =
                            agent_create_event(INVALID_ID, AgentType::SinkAgent, INVALID_ID);
                        manager.handle_event(&mut event)
                    })
                })
                .collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(SharingErrorCode::ServiceLimit)));
        assert_eq!(h.manager.context_count(), 1);
        assert_eq!(h.router.sync_requests(), 1);
        assert!(!h.manager.check_agent_size(AgentType::SinkAgent));
    }

    #[test]
    fn test_failed_creation_releases_quota_slot() {
        let mut h = Harness::new(json!({ "context": { "agentLimit": { "maxSinkAgent": 1 } } }));
        h.router.fail_sync(SharingErrorCode::SyncTimeout);
        assert_eq!(
            h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID),
            Err(SharingErrorCode::SyncTimeout)
        );
        assert!(h.manager.check_agent_size(AgentType::SinkAgent));
    }

    #[test]
    fn test_zero_sink_quota_touches_nothing() {
        let mut h = Harness::new(json!({ "context": { "agentLimit": { "maxSinkAgent": 0 } } }));
        assert_eq!(
            h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID),
            Err(SharingErrorCode::ServiceLimit)
        );
        assert_eq!(h.manager.context_count(), 0);
        assert_eq!(h.router.sync_requests(), 0);
    }

    #[test]
    fn test_lazy_context_creation() {
        let mut h = Harness::new(json!({}));
        let (context_id, agent_id) = h
            .create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID)
            .unwrap();
        assert_ne!(context_id, INVALID_ID);
        assert_ne!(agent_id, INVALID_ID);

        let context = h.manager.get_context(context_id).unwrap();
        assert!(context.get_agent(agent_id).is_some());
    }

    #[test]
    fn test_unknown_context_is_reported() {
        let mut h = Harness::new(json!({}));
        assert_eq!(
            h.create_agent(4242, AgentType::SinkAgent, INVALID_ID),
            Err(SharingErrorCode::ContextNotFound)
        );
        assert_eq!(h.manager.context_count(), 0);
    }

    #[test]
    fn test_failed_lazy_creation_leaves_no_context() {
        let mut h = Harness::new(json!({}));
        assert_eq!(
            h.create_agent(INVALID_ID, AgentType::SrcAgent, 99),
            Err(SharingErrorCode::AgentNotFound)
        );
        assert_eq!(h.manager.context_count(), 0);
    }

    #[test]
    fn test_global_quota_spans_contexts() {
        let mut h = Harness::new(json!({
            "context": { "agentLimit": { "maxSinkAgent": 2, "maxSrcAgent": 1 } }
        }));
        let (c1, s1) = h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID).unwrap();
        let (c2, _) = h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID).unwrap();
        assert_ne!(c1, c2);
        assert_eq!(
            h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID),
            Err(SharingErrorCode::ServiceLimit)
        );

        h.create_agent(c1, AgentType::SrcAgent, s1).unwrap();
        assert_eq!(
            h.create_agent(c1, AgentType::SrcAgent, s1),
            Err(SharingErrorCode::ServiceLimit)
        );
        assert_eq!(h.manager.context_count(), 2);
    }

    #[test]
    fn test_context_quota() {
        let h = Harness::new(json!({ "context": { "agentLimit": { "maxContext": 1 } } }));
        let mut create = SharingEvent::new(
            EventType::EventContextmgrCreate,
            ModuleType::Interaction,
            ModuleType::ContextManager,
            EventPayload::Empty,
        );
        h.manager.handle_event(&mut create).unwrap();
        assert_ne!(create.dst_id, INVALID_ID);

        let mut again = create.clone().with_dst(INVALID_ID);
        assert_eq!(
            h.manager.handle_event(&mut again),
            Err(SharingErrorCode::ServiceLimit)
        );
    }

    #[test]
    fn test_cascading_destroy() {
        let mut h = Harness::new(json!({}));
        let (ctx, sink) = h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID).unwrap();
        let (_, a1) = h.create_agent(ctx, AgentType::SrcAgent, sink).unwrap();
        let (_, a2) = h.create_agent(ctx, AgentType::SrcAgent, sink).unwrap();
        for agent in [sink, a1, a2] {
            h.command(ctx, agent, EventType::EventAgentStart);
        }
        h.pump();
        assert_eq!(
            *h.media.lock().unwrap(),
            vec![MediaStatus::Created; 3],
            "channel replies reach the sessions"
        );
        let steps_done = h
            .interaction
            .iter()
            .filter(|e| e.event_type == EventType::EventInteractionStateAgentStepDone)
            .count();
        assert_eq!(steps_done, 3);

        let context = h.manager.get_context(ctx).unwrap();
        let mut destroy = SharingEvent::new(
            EventType::EventContextAgentDestroy,
            ModuleType::Interaction,
            ModuleType::ContextManager,
            EventPayload::Context(ContextEventMsg::for_agent(sink, AgentType::SinkAgent)),
        )
        .with_src(1)
        .with_dst(ctx);
        h.manager.handle_event(&mut destroy).unwrap();

        // Destroy went to the sources; the sink stays until they are gone.
        assert!(context.get_agent(sink).is_some());
        assert_eq!(context.src_count(), 2);
        assert!(h.get_agent_step_destroy(&context, a1));
        assert!(h.get_agent_step_destroy(&context, a2));

        h.pump();
        let destroyed = h.destroyed();
        assert_eq!(destroyed.len(), 3);
        assert!(destroyed[..2].contains(&a1) && destroyed[..2].contains(&a2));
        assert_eq!(destroyed[2], sink);
        assert!(context.is_empty_agent());
        assert!(h.manager.get_context(ctx).is_none());
        assert_eq!(h.audio.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_destroy_leaves_sink() {
        let mut h = Harness::new(json!({}));
        let (ctx, sink) = h.create_agent(INVALID_ID, AgentType::SinkAgent, INVALID_ID).unwrap();
        let (_, src) = h.create_agent(ctx, AgentType::SrcAgent, sink).unwrap();

        h.command(ctx, src, EventType::EventAgentDestroy);
        h.pump();

        let context = h.manager.get_context(ctx).unwrap();
        assert_eq!(h.destroyed(), vec![src]);
        assert!(context.get_agent(sink).is_some());
        assert_eq!(h.audio.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configure_push_reloads_limits() {
        let h = Harness::new(json!({}));
        assert_eq!(h.manager.limits(), AgentLimits::default());
        assert!(!h.manager.network_log_enabled());

        let mut push = SharingEvent::new(
            EventType::EventConfigureContext,
            ModuleType::Configure,
            ModuleType::ContextManager,
            EventPayload::Configure(ConfigEventMsg {
                data: json!({
                    "context": { "agentLimit": { "maxSrcAgent": 3 } },
                    "network": { "networkLimit": { "logOn": 1 } }
                }),
            }),
        );
        h.manager.handle_event(&mut push).unwrap();
        assert_eq!(h.manager.limits().max_src_agent, 3);
        assert_eq!(
            h.manager.limits().max_sink_agent,
            AgentLimits::DEFAULT_MAX_SINK_AGENT
        );
        assert!(h.manager.network_log_enabled());
    }

    impl Harness {
        fn get_agent_step_destroy(&self, context: &Context, agent_id: u32) -> bool {
            context
                .get_agent(agent_id)
                .is_some_and(|a| a.run_state().0 == sharing_core::RunStep::Destroy)
        }
    }
}
