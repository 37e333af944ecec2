//! Request/reply surface offered to interaction clients.

use async_trait::async_trait;
use sharing_core::SharingErrorCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    event_loop::EventLoopHandle,
    protocol::{ClientRequest, ServiceReply},
};

/// Something that can answer client requests.
#[async_trait]
pub trait SharingService: Send + Sync {
    /// Handle one request issued by `interaction_id`.
    async fn handle_request(&self, interaction_id: u32, request: ClientRequest) -> ServiceReply;

    /// Parse a JSON request and handle it; parse failures become error replies.
    async fn handle_json(&self, interaction_id: u32, text: &str) -> ServiceReply {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => self.handle_request(interaction_id, request).await,
            Err(e) => {
                tracing::warn!("Invalid client request: {e}");
                ServiceReply::Error {
                    code: SharingErrorCode::GeneralError.code(),
                    message: format!("Invalid request: {e}"),
                }
            }
        }
    }
}

#[async_trait]
impl SharingService for EventLoopHandle {
    async fn handle_request(&self, interaction_id: u32, request: ClientRequest) -> ServiceReply {
        let event = match request.into_event(interaction_id) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Rejected request from {interaction_id}: {e}");
                return ServiceReply::Error {
                    code: SharingErrorCode::InvalidId.code(),
                    message: e.to_string(),
                };
            }
        };
        ServiceReply::from_result(self.request(event).await)
    }
}

/// Serve newline-delimited JSON requests from one client until EOF.
///
/// # Errors
/// Returns error if reading from or writing to the client fails.
pub async fn serve_lines<S, R, W>(
    service: &S,
    interaction_id: u32,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    S: SharingService + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = service.handle_json(interaction_id, &line).await;
        let mut json = serde_json::to_string(&reply).map_err(std::io::Error::other)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }
    tracing::debug!("Client {interaction_id} disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use sharing_core::{AgentType, IdGenerator, ModuleEndpoint, traits::NoAudioRouting};
    use sharing_session::{ContextManager, SessionRegistry};
    use tokio::io::BufReader;

    use super::*;
    use crate::{
        event_loop::{EventLoop, EventLoopConfig},
        loopback::{LOOPBACK_SESSION_CLASS, LoggingInteraction, LoopbackMediaChannel, LoopbackSession},
        protocol::AgentCommand,
    };

    fn start() -> EventLoop {
        let sessions = SessionRegistry::new();
        sessions.register(LOOPBACK_SESSION_CLASS, || Box::new(LoopbackSession::default()));
        let event_loop = EventLoop::spawn(
            tokio::runtime::Handle::current(),
            EventLoopConfig {
                sync_timeout: Duration::from_secs(1),
                ..EventLoopConfig::default()
            },
            |router| {
                ContextManager::new(
                    router,
                    Arc::new(NoAudioRouting),
                    sessions,
                    Arc::new(IdGenerator::new()),
                )
            },
        )
        .unwrap();

        let handle = event_loop.handle();
        handle.register_endpoint(Arc::new(LoopbackMediaChannel::new(Arc::new(handle.clone()))));
        handle.register_endpoint(Arc::new(LoggingInteraction) as Arc<dyn ModuleEndpoint>);
        event_loop
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_and_command_agents() {
        let event_loop = start();
        let service = event_loop.handle();

        let reply = service
            .handle_request(
                1,
                ClientRequest::CreateAgent {
                    context_id: None,
                    class_name: LOOPBACK_SESSION_CLASS.to_string(),
                    agent_type: AgentType::SinkAgent,
                    sink_agent_id: None,
                },
            )
            .await;
        let ServiceReply::AgentCreated {
            context_id,
            agent_id: sink,
        } = reply
        else {
            panic!("unexpected reply {reply:?}");
        };

        let reply = service
            .handle_request(
                1,
                ClientRequest::CreateAgent {
                    context_id: Some(context_id),
                    class_name: LOOPBACK_SESSION_CLASS.to_string(),
                    agent_type: AgentType::SrcAgent,
                    sink_agent_id: Some(sink),
                },
            )
            .await;
        assert!(matches!(reply, ServiceReply::AgentCreated { context_id: c, .. } if c == context_id));

        let reply = service
            .handle_request(
                1,
                ClientRequest::AgentCommand {
                    context_id,
                    agent_id: sink,
                    command: AgentCommand::Start,
                    surface: None,
                    is_main_surface: false,
                },
            )
            .await;
        assert_eq!(reply, ServiceReply::Ack);

        let reply = service
            .handle_request(
                1,
                ClientRequest::CreateAgent {
                    context_id: Some(context_id),
                    class_name: "Unregistered".to_string(),
                    agent_type: AgentType::SinkAgent,
                    sink_agent_id: None,
                },
            )
            .await;
        assert_eq!(reply, ServiceReply::error(SharingErrorCode::SessionCreate));

        event_loop.shutdown();
    }

    struct AckService;

    #[async_trait]
    impl SharingService for AckService {
        async fn handle_request(&self, _interaction_id: u32, _request: ClientRequest) -> ServiceReply {
            ServiceReply::Ack
        }
    }

    #[tokio::test]
    async fn test_serve_lines_writes_one_reply_per_request() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"create_context\"}\n")
            .read(b"  \n{\"type\":\"configure\",\"data\":{}}\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(b"{\"type\":\"ack\"}\n")
            .write(b"{\"type\":\"ack\"}\n")
            .build();

        serve_lines(&AckService, 3, BufReader::new(reader), writer)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_lines() {
        let event_loop = start();
        let service = event_loop.handle();

        let input = concat!(
            "{\"type\":\"create_context\"}\n",
            "\n",
            "not json\n",
            "{\"type\":\"configure\",\"data\":{\"network\":{\"networkLimit\":{\"logOn\":1}}}}\n",
        );
        let mut output = Vec::new();
        serve_lines(&service, 7, BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let replies: Vec<ServiceReply> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert!(matches!(replies[0], ServiceReply::ContextCreated { .. }));
        assert!(matches!(replies[1], ServiceReply::Error { .. }));
        assert_eq!(replies[2], ServiceReply::Ack);

        event_loop.shutdown();
    }
}
