//! Doubles shared by the unit tests of this crate.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use sharing_core::{
    AgentListener, EventPayload, EventRouter, EventType, MediaStatus, ModuleType, RunStep, Session,
    SessionListener, SharingErrorCode, SharingEvent,
    event::{AgentEventMsg, AgentStatusMsg},
    traits::SessionNotify,
};

use crate::session::SessionRegistry;

pub const LOOPBACK_CLASS: &str = "LoopbackSession";

/// Session that answers every operation immediately on the caller's stack.
///
/// Notifies the same sequence as `sharing_transport::loopback::LoopbackSession`; the
/// transport crate depends on this one, so the double cannot be shared. This
/// copy additionally records media status updates for assertions.
#[derive(Default)]
pub struct LoopbackSession {
    listener: Mutex<Option<Weak<dyn SessionListener>>>,
    media: Arc<Mutex<Vec<MediaStatus>>>,
}

impl LoopbackSession {
    fn notify(&self, notify: SessionNotify) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.on_session_notify(notify);
        }
    }
}

impl Session for LoopbackSession {
    fn set_listener(&self, listener: Weak<dyn SessionListener>) {
        *self.listener.lock().unwrap() = Some(listener);
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
        self.media.lock().unwrap().push(status);
    }
}

pub fn loopback_registry() -> SessionRegistry {
    loopback_registry_recording().0
}

/// Registry whose sessions all append media status updates to one log.
pub fn loopback_registry_recording() -> (SessionRegistry, Arc<Mutex<Vec<MediaStatus>>>) {
    let media = Arc::new(Mutex::new(Vec::new()));
    let registry = SessionRegistry::new();
    let shared = Arc::clone(&media);
    registry.register(LOOPBACK_CLASS, move || {
        Box::new(LoopbackSession {
            listener: Mutex::new(None),
            media: Arc::clone(&shared),
        })
    });
    (registry, media)
}

/// Agent listener that only records what it is told.
#[derive(Default)]
pub struct RecordingListener {
    received: Mutex<Vec<AgentStatusMsg>>,
}

impl RecordingListener {
    pub fn take(&self) -> Vec<AgentStatusMsg> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }
}

impl AgentListener for RecordingListener {
    fn on_agent_notify(&self, msg: AgentStatusMsg) -> Result<(), SharingErrorCode> {
        self.received.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Router that queues posted events and answers channel creation itself.
pub struct RecordingRouter {
    posted: Mutex<VecDeque<SharingEvent>>,
    next_channel: AtomicU32,
    sync_requests: AtomicUsize,
    sync_failure: Mutex<Option<SharingErrorCode>>,
    sync_delay: Mutex<Duration>,
}

impl Default for RecordingRouter {
    fn default() -> Self {
        Self {
            posted: Mutex::new(VecDeque::new()),
            next_channel: AtomicU32::new(Self::FIRST_CHANNEL_ID),
            sync_requests: AtomicUsize::new(0),
            sync_failure: Mutex::new(None),
            sync_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl RecordingRouter {
    pub const FIRST_CHANNEL_ID: u32 = 500;

    pub fn take(&self) -> Vec<SharingEvent> {
        self.posted.lock().unwrap().drain(..).collect()
    }

    pub fn pop(&self) -> Option<SharingEvent> {
        self.posted.lock().unwrap().pop_front()
    }

    pub fn sync_requests(&self) -> usize {
        self.sync_requests.load(Ordering::SeqCst)
    }

    pub fn fail_sync(&self, code: SharingErrorCode) {
        *self.sync_failure.lock().unwrap() = Some(code);
    }

    /// Make every synchronous request block for `delay` before answering.
    pub fn delay_sync(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = delay;
    }

    /// What a media channel would answer to `event`, if anything.
    pub fn media_channel_reply(event: &SharingEvent) -> Option<SharingEvent> {
        let agent_id = event.agent_id()?;
        let reply_type = match event.event_type {
            EventType::EventMediaConsumerCreate | EventType::EventMediaProducerCreate => {
                EventType::EventAgentStateProsumerCreate
            }
            EventType::EventMediaConsumerStart | EventType::EventMediaProducerStart => {
                EventType::EventAgentStateProsumerStart
            }
            EventType::EventMediaConsumerDestroy | EventType::EventMediaProducerDestroy => {
                EventType::EventAgentStateProsumerDestroy
            }
            EventType::EventMediaChannelDestroy => {
                return Some(
                    SharingEvent::new(
                        EventType::EventContextmgrStateChannelDestroy,
                        ModuleType::MediaChannel,
                        ModuleType::ContextManager,
                        event.payload.clone(),
                    )
                    .with_src(event.dst_id)
                    .with_dst(event.src_id),
                );
            }
            _ => return None,
        };
        Some(
            SharingEvent::new(
                reply_type,
                ModuleType::MediaChannel,
                ModuleType::ContextManager,
                EventPayload::Agent(AgentEventMsg::new(agent_id)),
            )
            .with_src(event.dst_id)
            .with_dst(event.src_id),
        )
    }
}

impl EventRouter for RecordingRouter {
    fn post(&self, event: SharingEvent) {
        self.posted.lock().unwrap().push_back(event);
    }

    fn send_sync(
        &self,
        event: SharingEvent,
        _timeout: Duration,
    ) -> Result<SharingEvent, SharingErrorCode> {
        self.sync_requests.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sync_delay.lock().unwrap();
        std::thread::sleep(delay);
        if let Some(code) = *self.sync_failure.lock().unwrap() {
            return Err(code);
        }
        assert_eq!(event.event_type, EventType::EventMediaChannelCreate);
        let channel_id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        let mut reply = event;
        reply.from_module = ModuleType::MediaChannel;
        reply.to_module = ModuleType::Context;
        reply.dst_id = channel_id;
        Ok(reply)
    }
}
