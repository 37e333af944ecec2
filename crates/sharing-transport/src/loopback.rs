//! In-process collaborators for hosts without a media pipeline.
//!
//! `LoopbackMediaChannel` answers channel and prosumer commands immediately,
//! `LoopbackSession` completes every run-step on the caller's stack and
//! `LoggingInteraction` traces what would go back to IPC clients.

use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU32, Ordering},
};

use sharing_core::{
    EventPayload, EventRouter, EventType, MediaStatus, ModuleEndpoint, ModuleType, RunStep,
    Session, SessionListener, SharingErrorCode, SharingEvent,
    event::AgentEventMsg,
    traits::SessionNotify,
};

/// Session class name under which [`LoopbackSession`] is usually registered.
pub const LOOPBACK_SESSION_CLASS: &str = "LoopbackSession";

/// Media channel that acknowledges everything.
pub struct LoopbackMediaChannel {
    router: Arc<dyn EventRouter>,
    next_channel: AtomicU32,
}

impl LoopbackMediaChannel {
    #[must_use]
    pub fn new(router: Arc<dyn EventRouter>) -> Self {
        Self {
            router,
            next_channel: AtomicU32::new(1),
        }
    }

    const fn prosumer_state(event_type: EventType) -> Option<EventType> {
        let state = match event_type {
            EventType::EventMediaConsumerCreate | EventType::EventMediaProducerCreate => {
                EventType::EventAgentStateProsumerCreate
            }
            EventType::EventMediaConsumerStart | EventType::EventMediaProducerStart => {
                EventType::EventAgentStateProsumerStart
            }
            EventType::EventMediaConsumerStop | EventType::EventMediaProducerStop => {
                EventType::EventAgentStateProsumerStop
            }
            EventType::EventMediaConsumerPause | EventType::EventMediaProducerPause => {
                EventType::EventAgentStateProsumerPause
            }
            EventType::EventMediaConsumerResume | EventType::EventMediaProducerResume => {
                EventType::EventAgentStateProsumerResume
            }
            EventType::EventMediaConsumerDestroy | EventType::EventMediaProducerDestroy => {
                EventType::EventAgentStateProsumerDestroy
            }
            _ => return None,
        };
        Some(state)
    }
}

impl ModuleEndpoint for LoopbackMediaChannel {
    fn module(&self) -> ModuleType {
        ModuleType::MediaChannel
    }

    fn on_event(&self, event: SharingEvent) {
        let Some(agent_id) = event.agent_id() else {
            tracing::warn!("Media channel: {:?} without agent", event.event_type);
            return;
        };

        let reply = if event.event_type == EventType::EventMediaChannelDestroy {
            tracing::info!("Media channel {} destroyed", event.dst_id);
            SharingEvent::new(
                EventType::EventContextmgrStateChannelDestroy,
                ModuleType::MediaChannel,
                ModuleType::ContextManager,
                event.payload,
            )
        } else if let Some(state) = Self::prosumer_state(event.event_type) {
            tracing::debug!("Media channel {}: {:?} for agent {agent_id}", event.dst_id, event.event_type);
            SharingEvent::new(
                state,
                ModuleType::MediaChannel,
                ModuleType::ContextManager,
                EventPayload::Agent(AgentEventMsg::new(agent_id)),
            )
        } else {
            tracing::debug!("Media channel ignores {:?}", event.event_type);
            return;
        };

        self.router
            .post(reply.with_src(event.dst_id).with_dst(event.src_id));
    }

    fn on_sync_event(&self, event: SharingEvent) -> Result<SharingEvent, SharingErrorCode> {
        if event.event_type != EventType::EventMediaChannelCreate {
            return Err(SharingErrorCode::Unsupported);
        }
        let channel_id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Media channel {channel_id} created for context {}", event.src_id);

        let mut reply = event;
        reply.from_module = ModuleType::MediaChannel;
        reply.to_module = ModuleType::Context;
        reply.dst_id = channel_id;
        Ok(reply)
    }
}

impl std::fmt::Debug for LoopbackMediaChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackMediaChannel")
            .field("next_channel", &self.next_channel.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Interaction endpoint that only traces notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInteraction;

impl ModuleEndpoint for LoggingInteraction {
    fn module(&self) -> ModuleType {
        ModuleType::Interaction
    }

    fn on_event(&self, event: SharingEvent) {
        match &event.payload {
            EventPayload::Interaction(msg) => tracing::info!(
                "Interaction {}: {:?} agent {} in context {} step {:?} error {:?}",
                event.dst_id,
                event.event_type,
                msg.agent_id,
                msg.context_id,
                msg.step,
                msg.error_code
            ),
            _ => tracing::info!("Interaction {}: {:?}", event.dst_id, event.event_type),
        }
    }

    fn on_sync_event(&self, _event: SharingEvent) -> Result<SharingEvent, SharingErrorCode> {
        Err(SharingErrorCode::Unsupported)
    }
}

/// Session completing every step as soon as it is requested.
#[derive(Default)]
pub struct LoopbackSession {
    listener: Mutex<Option<Weak<dyn SessionListener>>>,
}

impl LoopbackSession {
    fn notify(&self, notify: SessionNotify) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match listener {
            Some(listener) => listener.on_session_notify(notify),
            None => tracing::debug!("Loopback session has no listener"),
        }
    }
}

impl Session for LoopbackSession {
    fn set_listener(&self, listener: Weak<dyn SessionListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn update_operation(&self, step: RunStep) {
        let notifications = match step {
            RunStep::Idle => Vec::new(),
            RunStep::Start => vec![SessionNotify::ProsumerCreate, SessionNotify::SessionStarted],
            RunStep::Play => vec![SessionNotify::ProsumerStart, SessionNotify::StepDone(step)],
            RunStep::PlayStop | RunStep::Stop => {
                vec![SessionNotify::ProsumerStop, SessionNotify::SessionStopped]
            }
            RunStep::Pause => vec![SessionNotify::ProsumerPause, SessionNotify::SessionPaused],
            RunStep::Resume => vec![SessionNotify::ProsumerResume, SessionNotify::SessionResumed],
            RunStep::AppendSurface | RunStep::RemoveSurface => vec![SessionNotify::StepDone(step)],
            RunStep::Destroy => vec![SessionNotify::SessionDestroyed],
        };
        for notify in notifications {
            self.notify(notify);
        }
    }

    fn update_media_status(&self, status: MediaStatus) {
        tracing::debug!("Loopback session media status {status:?}");
    }

    fn handle_private_event(&self, event: &SharingEvent) -> Result<(), SharingErrorCode> {
        if let Some(surface) = event.agent_msg().and_then(|m| m.surface_id) {
            tracing::debug!("Loopback session surface {surface:#x}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use sharing_core::{INVALID_ID, event::ChannelEventMsg};

    use super::*;

    #[derive(Default)]
    struct Queue(Mutex<VecDeque<SharingEvent>>);

    impl EventRouter for Queue {
        fn post(&self, event: SharingEvent) {
            self.0.lock().unwrap().push_back(event);
        }

        fn send_sync(
            &self,
            _event: SharingEvent,
            _timeout: Duration,
        ) -> Result<SharingEvent, SharingErrorCode> {
            Err(SharingErrorCode::Unsupported)
        }
    }

    fn channel_event(event_type: EventType) -> SharingEvent {
        SharingEvent::new(
            event_type,
            ModuleType::Context,
            ModuleType::MediaChannel,
            EventPayload::Channel(ChannelEventMsg {
                agent_id: 5,
                channel_id: INVALID_ID,
                prosumer_id: 5,
                error_code: None,
            }),
        )
        .with_src(3)
    }

    #[test]
    fn test_channel_ids_and_replies() {
        let queue = Arc::new(Queue::default());
        let channel = LoopbackMediaChannel::new(Arc::clone(&queue) as Arc<dyn EventRouter>);

        let first = channel
            .on_sync_event(channel_event(EventType::EventMediaChannelCreate))
            .unwrap();
        let second = channel
            .on_sync_event(channel_event(EventType::EventMediaChannelCreate))
            .unwrap();
        assert_eq!((first.dst_id, second.dst_id), (1, 2));

        channel.on_event(channel_event(EventType::EventMediaProducerPause).with_dst(1));
        channel.on_event(channel_event(EventType::EventMediaChannelDestroy).with_dst(1));
        let replies: Vec<_> = queue.0.lock().unwrap().drain(..).collect();
        assert_eq!(replies[0].event_type, EventType::EventAgentStateProsumerPause);
        assert_eq!(replies[0].dst_id, 3);
        assert_eq!(replies[1].event_type, EventType::EventContextmgrStateChannelDestroy);
        assert_eq!(replies[1].agent_id(), Some(5));
    }
}
