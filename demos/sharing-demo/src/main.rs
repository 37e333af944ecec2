//! Drives the sharing core end to end with loopback modules.
//!
//! Run with: cargo run -p sharing-demo [-- path/to/config.json]
//!
//! Creates a sink and two sources in one context, starts the sink, then
//! destroys the sink and waits for the cascade to finish. Afterwards an RTCP
//! SR/RR exchange is simulated between a sender and a receiver.

use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, bail};
use sharing_core::{
    AgentType, EventType, IdGenerator, JsonConfig, ModuleType, SharingEvent, traits::NoAudioRouting,
};
use sharing_rtcp::{Clock, ManualClock, RtcpPacket, RtcpReceiverContext, RtcpSenderContext};
use sharing_session::{ContextManager, SessionRegistry};
use sharing_transport::{
    AgentCommand, ClientRequest, EventLoop, EventLoopConfig, ServiceReply, SharingService,
    loopback::{LOOPBACK_SESSION_CLASS, LoggingInteraction, LoopbackMediaChannel, LoopbackSession},
};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INTERACTION_ID: u32 = 1;

const DEFAULT_CONFIG: &str = r#"{
    "context": { "agentLimit": { "maxContext": 4, "maxSinkAgent": 4, "maxSrcAgent": 8 } },
    "network": { "networkLimit": { "logOn": 1 } }
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => JsonConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => JsonConfig::from_json_str(DEFAULT_CONFIG)?,
    };

    run_sharing(&config).await?;
    run_rtcp()?;
    Ok(())
}

async fn run_sharing(config: &JsonConfig) -> anyhow::Result<()> {
    let sessions = SessionRegistry::new();
    sessions.register(LOOPBACK_SESSION_CLASS, || Box::new(LoopbackSession::default()));

    let event_loop = EventLoop::spawn(
        tokio::runtime::Handle::current(),
        EventLoopConfig::default(),
        |router| {
            let manager = ContextManager::new(
                router,
                Arc::new(NoAudioRouting),
                sessions,
                Arc::new(IdGenerator::new()),
            );
            manager.init(config);
            manager
        },
    )?;
    let service = event_loop.handle();
    service.register_endpoint(Arc::new(LoopbackMediaChannel::new(Arc::new(service.clone()))));
    service.register_endpoint(Arc::new(LoggingInteraction));
    let mut events = service.event_log().get_receiver();

    let (context_id, sink) = match create_agent(&service, None, AgentType::SinkAgent, None).await {
        ServiceReply::AgentCreated {
            context_id,
            agent_id,
        } => (context_id, agent_id),
        other => bail!("sink creation failed: {other:?}"),
    };
    tracing::info!("Sink {sink} ready in context {context_id}");

    for _ in 0..2 {
        let reply =
            create_agent(&service, Some(context_id), AgentType::SrcAgent, Some(sink)).await;
        tracing::info!("Source creation: {reply:?}");
    }

    let reply = service
        .handle_request(
            INTERACTION_ID,
            ClientRequest::AgentCommand {
                context_id,
                agent_id: sink,
                command: AgentCommand::Start,
                surface: None,
                is_main_surface: false,
            },
        )
        .await;
    tracing::info!("Start sink: {reply:?}");

    let reply = service
        .handle_request(
            INTERACTION_ID,
            ClientRequest::DestroyAgent {
                context_id,
                agent_id: sink,
            },
        )
        .await;
    tracing::info!("Destroy sink: {reply:?}");

    let mut remaining = 3;
    while remaining > 0 {
        let event = wait_for_interaction(&mut events).await?;
        if event.event_type == EventType::EventInteractionStateAgentDestroyed {
            remaining -= 1;
        }
    }
    tracing::info!("All agents destroyed");

    event_loop.shutdown();
    Ok(())
}

async fn create_agent(
    service: &impl SharingService,
    context_id: Option<u32>,
    agent_type: AgentType,
    sink_agent_id: Option<u32>,
) -> ServiceReply {
    service
        .handle_request(
            INTERACTION_ID,
            ClientRequest::CreateAgent {
                context_id,
                class_name: LOOPBACK_SESSION_CLASS.to_string(),
                agent_type,
                sink_agent_id,
            },
        )
        .await
}

async fn wait_for_interaction(
    events: &mut broadcast::Receiver<SharingEvent>,
) -> anyhow::Result<SharingEvent> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .context("timed out waiting for interaction events")??;
        if event.to_module == ModuleType::Interaction {
            return Ok(event);
        }
    }
}

fn run_rtcp() -> anyhow::Result<()> {
    const SENDER_SSRC: u32 = 0x1111;
    const RECEIVER_SSRC: u32 = 0x2222;
    const SAMPLE_RATE: u32 = 90_000;

    let clock = ManualClock::new(1_700_000_000_000);
    let mut sender = RtcpSenderContext::with_clock(clock.clone());
    let mut receiver = RtcpReceiverContext::with_clock(clock.clone());

    for seq in 0u16..50 {
        let now = clock.now_ms();
        let stamp = u32::from(seq) * 3000;
        sender.on_rtp(seq, stamp, now, SAMPLE_RATE, 1200);
        // Every tenth packet is lost on the way.
        if seq % 10 != 9 {
            receiver.on_rtp(seq, stamp, now, SAMPLE_RATE, 1200);
        }
        clock.advance(33);
    }

    let sr = RtcpPacket::from(sender.create_rtcp_sr(SENDER_SSRC)).encode()?;
    let (sr, _) = RtcpPacket::parse(&sr)?;
    receiver.on_rtcp(&sr);

    clock.advance(40);
    let rr = RtcpPacket::from(receiver.create_rtcp_rr(RECEIVER_SSRC, SENDER_SSRC)).encode()?;
    clock.advance(20);
    let (rr, _) = RtcpPacket::parse(&rr)?;
    sender.on_rtcp(&rr);

    tracing::info!(
        "RTCP: sent {} packets, receiver lost {}, jitter {:.2}, rtt {} ms",
        sender.counters().packets,
        receiver.lost(),
        receiver.jitter(),
        sender.rtt(SENDER_SSRC)
    );
    Ok(())
}
