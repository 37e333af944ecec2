//! Wire protocol between interaction clients and the sharing service.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sharing_core::{
    AgentType, EventPayload, EventType, INVALID_ID, ModuleType, SharingErrorCode, SharingEvent,
    event::{AgentEventMsg, ConfigEventMsg, ContextEventMsg},
};
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid surface encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Surface handle must be 8 bytes, got {0}")]
    SurfaceLength(usize),
}

/// Operation on an existing agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCommand {
    Start,
    Stop,
    PlayStart,
    PlayStop,
    Pause,
    Resume,
    AppendSurface,
    RemoveSurface,
}

impl AgentCommand {
    #[must_use]
    pub const fn event_type(self) -> EventType {
        match self {
            Self::Start => EventType::EventAgentStart,
            Self::Stop => EventType::EventAgentStop,
            Self::PlayStart => EventType::EventAgentPlayStart,
            Self::PlayStop => EventType::EventAgentPlayStop,
            Self::Pause => EventType::EventAgentPause,
            Self::Resume => EventType::EventAgentResume,
            Self::AppendSurface => EventType::EventAgentChannelAppendsurface,
            Self::RemoveSurface => EventType::EventAgentChannelRemovesurface,
        }
    }
}

/// Request from an interaction client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Create an empty context.
    CreateContext,
    /// Create an agent; without `context_id` a context is created for it.
    CreateAgent {
        #[serde(default)]
        context_id: Option<u32>,
        class_name: String,
        agent_type: AgentType,
        #[serde(default)]
        sink_agent_id: Option<u32>,
    },
    /// Destroy an agent; a sink waits for its sources.
    DestroyAgent { context_id: u32, agent_id: u32 },
    /// Drive an agent through a run-step.
    AgentCommand {
        context_id: u32,
        agent_id: u32,
        command: AgentCommand,
        /// Opaque surface handle (base64 encoded).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        surface: Option<String>,
        #[serde(default)]
        is_main_surface: bool,
    },
    /// Push a configuration subtree.
    Configure { data: Value },
}

impl ClientRequest {
    /// Encode a surface handle for transport.
    #[must_use]
    pub fn encode_surface(handle: u64) -> String {
        BASE64.encode(handle.to_be_bytes())
    }

    /// Decode a surface handle.
    ///
    /// # Errors
    /// Returns error if the text is not base64 of exactly 8 bytes.
    pub fn decode_surface(data: &str) -> Result<u64, ProtocolError> {
        let bytes = BASE64.decode(data)?;
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::SurfaceLength(bytes.len()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Build the envelope handed to the context manager on behalf of
    /// `interaction_id`.
    ///
    /// # Errors
    /// Returns error if the surface handle cannot be decoded.
    pub fn into_event(self, interaction_id: u32) -> Result<SharingEvent, ProtocolError> {
        let (event_type, dst_id, payload) = match self {
            Self::CreateContext => (EventType::EventContextmgrCreate, INVALID_ID, EventPayload::Empty),
            Self::CreateAgent {
                context_id,
                class_name,
                agent_type,
                sink_agent_id,
            } => {
                let mut msg = ContextEventMsg::create(class_name, agent_type);
                msg.sink_agent_id = sink_agent_id.unwrap_or(INVALID_ID);
                msg.interaction_id = interaction_id;
                (
                    EventType::EventContextmgrAgentCreate,
                    context_id.unwrap_or(INVALID_ID),
                    EventPayload::Context(msg),
                )
            }
            Self::DestroyAgent {
                context_id,
                agent_id,
            } => (
                EventType::EventContextAgentDestroy,
                context_id,
                EventPayload::Agent(AgentEventMsg::new(agent_id)),
            ),
            Self::AgentCommand {
                context_id,
                agent_id,
                command,
                surface,
                is_main_surface,
            } => {
                let mut msg = AgentEventMsg::new(agent_id);
                msg.surface_id = surface.as_deref().map(Self::decode_surface).transpose()?;
                msg.is_main_surface = is_main_surface;
                (command.event_type(), context_id, EventPayload::Agent(msg))
            }
            Self::Configure { data } => (
                EventType::EventConfigureContext,
                INVALID_ID,
                EventPayload::Configure(ConfigEventMsg { data }),
            ),
        };

        Ok(SharingEvent::new(
            event_type,
            ModuleType::Interaction,
            ModuleType::ContextManager,
            payload,
        )
        .with_src(interaction_id)
        .with_dst(dst_id))
    }
}

/// Reply to a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceReply {
    ContextCreated { context_id: u32 },
    AgentCreated { context_id: u32, agent_id: u32 },
    Ack,
    Error { code: i32, message: String },
}

impl ServiceReply {
    /// Build the reply from the handled envelope.
    #[must_use]
    pub fn from_result(result: Result<SharingEvent, SharingErrorCode>) -> Self {
        match result {
            Ok(event) => match event.event_type {
                EventType::EventContextmgrCreate => Self::ContextCreated {
                    context_id: event.dst_id,
                },
                EventType::EventContextmgrAgentCreate => Self::AgentCreated {
                    context_id: event.dst_id,
                    agent_id: event.agent_id().unwrap_or(INVALID_ID),
                },
                _ => Self::Ack,
            },
            Err(code) => Self::error(code),
        }
    }

    #[must_use]
    pub fn error(code: SharingErrorCode) -> Self {
        Self::Error {
            code: code.code(),
            message: code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_roundtrip() {
        let encoded = ClientRequest::encode_surface(0xDEAD_BEEF_0042);
        assert_eq!(ClientRequest::decode_surface(&encoded).unwrap(), 0xDEAD_BEEF_0042);
        assert!(matches!(
            ClientRequest::decode_surface("AAAA"),
            Err(ProtocolError::SurfaceLength(3))
        ));
    }

    #[test]
    fn test_create_agent_envelope() {
        let json = r#"{"type":"create_agent","class_name":"WfdSinkSession","agent_type":"SINK_AGENT"}"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        let event = request.into_event(12).unwrap();

        assert_eq!(event.event_type, EventType::EventContextmgrAgentCreate);
        assert_eq!(event.to_module, ModuleType::ContextManager);
        assert_eq!(event.src_id, 12);
        assert_eq!(event.dst_id, INVALID_ID);
        let msg = event.context_msg().unwrap();
        assert_eq!(msg.sink_agent_id, INVALID_ID);
        assert_eq!(msg.interaction_id, 12);
    }

    #[test]
    fn test_command_carries_surface() {
        let request = ClientRequest::AgentCommand {
            context_id: 3,
            agent_id: 4,
            command: AgentCommand::AppendSurface,
            surface: Some(ClientRequest::encode_surface(77)),
            is_main_surface: true,
        };
        let event = request.into_event(1).unwrap();
        assert_eq!(event.event_type, EventType::EventAgentChannelAppendsurface);
        assert_eq!(event.dst_id, 3);
        let msg = event.agent_msg().unwrap();
        assert_eq!(msg.surface_id, Some(77));
        assert!(msg.is_main_surface);
    }

    #[test]
    fn test_reply_from_result() {
        let mut event = ClientRequest::CreateContext.into_event(1).unwrap();
        event.dst_id = 9;
        assert_eq!(
            ServiceReply::from_result(Ok(event)),
            ServiceReply::ContextCreated { context_id: 9 }
        );

        let reply = ServiceReply::from_result(Err(SharingErrorCode::ServiceLimit));
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains(&SharingErrorCode::ServiceLimit.code().to_string()));
    }
}
