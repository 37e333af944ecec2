//! Event envelope and the closed message taxonomy routed between modules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    SharingErrorCode,
    types::{AgentType, INVALID_ID, RunStep},
};

/// Logical subsystem an event is sent from or addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleType {
    Context,
    ContextManager,
    MediaChannel,
    Interaction,
    Configure,
    Window,
    Unknown,
}

/// Discriminator of every event the orchestration core sends or consumes.
///
/// Numeric values are part of the IPC contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum EventType {
    EventContextmgrCreate = 1000,
    EventContextmgrAgentCreate = 1001,
    EventContextmgrStateChannelDestroy = 1002,

    EventContextAgentCreate = 1100,
    EventContextAgentDestroy = 1101,
    EventContextStateAgentDestroy = 1102,

    EventConfigureContext = 1200,

    EventAgentStart = 1300,
    EventAgentStop = 1301,
    EventAgentPlayStart = 1302,
    EventAgentPlayStop = 1303,
    EventAgentPause = 1304,
    EventAgentResume = 1305,
    EventAgentDestroy = 1306,
    EventAgentChannelAppendsurface = 1307,
    EventAgentChannelRemovesurface = 1308,
    /// Literal name kept as peers encode it.
    #[serde(rename = "EVENT_AGEINT_ACCELERATION_DONE")]
    EventAgeintAccelerationDone = 1309,
    EventAgentStateProsumerCreate = 1320,
    EventAgentStateProsumerStart = 1321,
    EventAgentStateProsumerStop = 1322,
    EventAgentStateProsumerPause = 1323,
    EventAgentStateProsumerResume = 1324,
    EventAgentStateProsumerDestroy = 1325,
    EventAgentProsumerError = 1326,

    EventMediaChannelCreate = 1400,
    EventMediaChannelDestroy = 1401,
    EventMediaConsumerCreate = 1410,
    EventMediaConsumerStart = 1411,
    EventMediaConsumerStop = 1412,
    EventMediaConsumerPause = 1413,
    EventMediaConsumerResume = 1414,
    EventMediaConsumerDestroy = 1415,
    EventMediaProducerCreate = 1420,
    EventMediaProducerStart = 1421,
    EventMediaProducerStop = 1422,
    EventMediaProducerPause = 1423,
    EventMediaProducerResume = 1424,
    EventMediaProducerDestroy = 1425,

    EventInteractionStateAgentDestroyed = 1500,
    EventInteractionMsgError = 1501,
    EventInteractionStateAgentStepDone = 1502,
    EventInteractionAgentPrivateEvent = 1503,
}

impl EventType {
    /// Stable wire value.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// True for the events an agent may still accept once it is destroying.
    #[must_use]
    pub const fn is_destroy_related(self) -> bool {
        matches!(
            self,
            Self::EventAgentDestroy
                | Self::EventContextAgentDestroy
                | Self::EventAgentStateProsumerStop
                | Self::EventAgentStateProsumerDestroy
                | Self::EventAgentProsumerError
        )
    }
}

/// Payload of an event addressed to a context or the context manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEventMsg {
    pub class_name: String,
    pub agent_type: AgentType,
    pub agent_id: u32,
    pub sink_agent_id: u32,
    pub interaction_id: u32,
}

impl ContextEventMsg {
    #[must_use]
    pub fn create(class_name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            class_name: class_name.into(),
            agent_type,
            agent_id: INVALID_ID,
            sink_agent_id: INVALID_ID,
            interaction_id: INVALID_ID,
        }
    }

    #[must_use]
    pub fn for_agent(agent_id: u32, agent_type: AgentType) -> Self {
        Self {
            class_name: String::new(),
            agent_type,
            agent_id,
            sink_agent_id: INVALID_ID,
            interaction_id: INVALID_ID,
        }
    }
}

/// Payload of a command or media-channel reply addressed to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEventMsg {
    pub agent_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_id: Option<u64>,
    #[serde(default)]
    pub is_main_surface: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<SharingErrorCode>,
}

impl AgentEventMsg {
    #[must_use]
    pub const fn new(agent_id: u32) -> Self {
        Self {
            agent_id,
            surface_id: None,
            is_main_surface: false,
            error_code: None,
        }
    }
}

/// Payload exchanged with the media channel module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEventMsg {
    pub agent_id: u32,
    pub channel_id: u32,
    pub prosumer_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<SharingErrorCode>,
}

/// Payload delivered to the interaction (IPC) layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEventMsg {
    pub context_id: u32,
    pub agent_id: u32,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<SharingErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<RunStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Status change reported by an agent to its owning context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatusMsg {
    pub agent_id: u32,
    pub agent_type: AgentType,
    pub to_module: ModuleType,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<SharingErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<RunStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Configuration subtree pushed by the configuration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEventMsg {
    pub data: Value,
}

/// Closed set of payload families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "msg", rename_all = "snake_case")]
pub enum EventPayload {
    Context(ContextEventMsg),
    Agent(AgentEventMsg),
    Channel(ChannelEventMsg),
    Interaction(InteractionEventMsg),
    AgentStatus(AgentStatusMsg),
    Configure(ConfigEventMsg),
    Empty,
}

/// Universal message unit routed between modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingEvent {
    pub event_type: EventType,
    pub from_module: ModuleType,
    pub to_module: ModuleType,
    pub src_id: u32,
    pub dst_id: u32,
    pub payload: EventPayload,
}

impl SharingEvent {
    /// Create an envelope with both ids unassigned.
    #[must_use]
    pub const fn new(
        event_type: EventType,
        from_module: ModuleType,
        to_module: ModuleType,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_type,
            from_module,
            to_module,
            src_id: INVALID_ID,
            dst_id: INVALID_ID,
            payload,
        }
    }

    #[must_use]
    pub fn with_src(mut self, src_id: u32) -> Self {
        self.src_id = src_id;
        self
    }

    #[must_use]
    pub fn with_dst(mut self, dst_id: u32) -> Self {
        self.dst_id = dst_id;
        self
    }

    /// Agent id embedded in the payload, if the payload family carries one.
    #[must_use]
    pub const fn agent_id(&self) -> Option<u32> {
        match &self.payload {
            EventPayload::Context(m) => Some(m.agent_id),
            EventPayload::Agent(m) => Some(m.agent_id),
            EventPayload::Channel(m) => Some(m.agent_id),
            EventPayload::Interaction(m) => Some(m.agent_id),
            EventPayload::AgentStatus(m) => Some(m.agent_id),
            EventPayload::Configure(_) | EventPayload::Empty => None,
        }
    }

    #[must_use]
    pub const fn context_msg(&self) -> Option<&ContextEventMsg> {
        match &self.payload {
            EventPayload::Context(m) => Some(m),
            _ => None,
        }
    }

    pub fn context_msg_mut(&mut self) -> Option<&mut ContextEventMsg> {
        match &mut self.payload {
            EventPayload::Context(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn channel_msg(&self) -> Option<&ChannelEventMsg> {
        match &self.payload {
            EventPayload::Channel(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn interaction_msg(&self) -> Option<&InteractionEventMsg> {
        match &self.payload {
            EventPayload::Interaction(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub const fn agent_msg(&self) -> Option<&AgentEventMsg> {
        match &self.payload {
            EventPayload::Agent(m) => Some(m),
            _ => None,
        }
    }
}
