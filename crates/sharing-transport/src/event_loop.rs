//! Single orchestration thread delivering events between modules.
//!
//! The context manager lives on one dedicated OS thread that drains an
//! unbounded queue. External modules (media channel, interaction) register a
//! [`ModuleEndpoint`]; fire-and-forget events reach them on the loop thread,
//! synchronous calls run on the blocking pool and are bounded by a timeout.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    thread::JoinHandle,
    time::Duration,
};

use futures::stream::BoxStream;
use sharing_core::{
    EventLog, EventRouter, ModuleEndpoint, ModuleType, SharingErrorCode, SharingEvent,
    event_log::DEFAULT_HISTORY_LEN,
};
use sharing_session::{ContextManager, DEFAULT_SYNC_TIMEOUT};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};

/// Event loop settings.
#[derive(Debug, Clone, Copy)]
pub struct EventLoopConfig {
    /// Bound on every synchronous call into an endpoint.
    pub sync_timeout: Duration,
    /// Events retained for late observers.
    pub history_len: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

type Reply = oneshot::Sender<Result<SharingEvent, SharingErrorCode>>;

enum Envelope {
    Post(SharingEvent),
    Request(SharingEvent, Reply),
    Shutdown,
}

type Endpoints = Arc<RwLock<HashMap<ModuleType, Arc<dyn ModuleEndpoint>>>>;

/// Cloneable handle used to post into the loop and to call it.
#[derive(Clone)]
pub struct EventLoopHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    endpoints: Endpoints,
    runtime: Handle,
    log: Arc<EventLog>,
    sync_timeout: Duration,
}

impl EventLoopHandle {
    /// Register the endpoint serving `endpoint.module()`, replacing any other.
    pub fn register_endpoint(&self, endpoint: Arc<dyn ModuleEndpoint>) {
        let module = endpoint.module();
        tracing::debug!("Registering endpoint for {module:?}");
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module, endpoint);
    }

    fn endpoint(&self, module: ModuleType) -> Option<Arc<dyn ModuleEndpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module)
            .cloned()
    }

    /// Every event dispatched through the loop.
    #[must_use]
    pub fn event_log(&self) -> Arc<EventLog> {
        Arc::clone(&self.log)
    }

    /// History followed by live events.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, SharingEvent> {
        self.log.history_plus_stream()
    }

    /// Hand an inbound request to the context manager and wait for the
    /// handled envelope.
    ///
    /// # Errors
    /// Returns the manager's error, or `ChannelClosed` if the loop stopped.
    pub async fn request(&self, event: SharingEvent) -> Result<SharingEvent, SharingErrorCode> {
        self.log.push(event.clone());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope::Request(event, reply_tx))
            .map_err(|_| SharingErrorCode::ChannelClosed)?;
        reply_rx.await.map_err(|_| SharingErrorCode::ChannelClosed)?
    }

    fn block_on<F>(&self, future: F) -> F::Output
    where
        F: std::future::Future + Send,
        F::Output: Send,
    {
        if Handle::try_current().is_ok() {
            // Already on a runtime thread; park a scoped thread instead.
            std::thread::scope(|s| {
                s.spawn(|| {
                    let _guard = self.runtime.enter();
                    futures::executor::block_on(future)
                })
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
        } else {
            self.runtime.block_on(future)
        }
    }
}

impl EventRouter for EventLoopHandle {
    fn post(&self, event: SharingEvent) {
        self.log.push(event.clone());
        if self.tx.send(Envelope::Post(event)).is_err() {
            tracing::warn!("Event loop stopped, dropping event");
        }
    }

    fn send_sync(
        &self,
        event: SharingEvent,
        timeout: Duration,
    ) -> Result<SharingEvent, SharingErrorCode> {
        self.log.push(event.clone());
        let Some(endpoint) = self.endpoint(event.to_module) else {
            tracing::error!("No endpoint for {:?}", event.to_module);
            return Err(SharingErrorCode::GeneralError);
        };
        let event_type = event.event_type;
        let timeout = timeout.min(self.sync_timeout);

        let reply = self.block_on(async move {
            let call = tokio::task::spawn_blocking(move || endpoint.on_sync_event(event));
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    tracing::error!("Sync call {event_type:?} failed: {e}");
                    Err(SharingErrorCode::GeneralError)
                }
                Err(_) => {
                    tracing::error!("Sync call {event_type:?} timed out after {timeout:?}");
                    Err(SharingErrorCode::SyncTimeout)
                }
            }
        })?;

        self.log.push(reply.clone());
        Ok(reply)
    }
}

impl std::fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

/// Owner of the orchestration thread.
#[derive(Debug)]
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start the loop. `make_manager` receives the router the manager must
    /// use for every outbound event.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn spawn<F>(runtime: Handle, config: EventLoopConfig, make_manager: F) -> std::io::Result<Self>
    where
        F: FnOnce(Arc<dyn EventRouter>) -> ContextManager,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EventLoopHandle {
            tx,
            endpoints: Arc::default(),
            runtime,
            log: Arc::new(EventLog::new(config.history_len)),
            sync_timeout: config.sync_timeout,
        };

        let router: Arc<dyn EventRouter> = Arc::new(handle.clone());
        let manager = make_manager(router).with_sync_timeout(config.sync_timeout);
        let loop_handle = handle.clone();
        let thread = std::thread::Builder::new()
            .name("sharing-event-loop".to_string())
            .spawn(move || run(rx, &manager, &loop_handle))?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Stop after the events already queued and wait for the thread.
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Event loop thread panicked");
            }
        }
    }

    fn stop(&self) {
        let _ = self.handle.tx.send(Envelope::Shutdown);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut rx: mpsc::UnboundedReceiver<Envelope>, manager: &ContextManager, handle: &EventLoopHandle) {
    tracing::info!("Event loop started");
    while let Some(envelope) = rx.blocking_recv() {
        match envelope {
            Envelope::Post(event) => dispatch(manager, handle, event),
            Envelope::Request(mut event, reply) => {
                let result = manager.handle_event(&mut event).map(|()| event);
                if let Err(e) = &result {
                    tracing::warn!("Request failed: {e}");
                }
                let _ = reply.send(result);
            }
            Envelope::Shutdown => break,
        }
    }
    // Endpoints may hold a router clone that points back at this map.
    handle
        .endpoints
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    tracing::info!("Event loop stopped");
}

fn dispatch(manager: &ContextManager, handle: &EventLoopHandle, mut event: SharingEvent) {
    match event.to_module {
        ModuleType::ContextManager | ModuleType::Context => {
            if let Err(e) = manager.handle_event(&mut event) {
                tracing::warn!("{:?} failed: {e}", event.event_type);
            }
        }
        module => match handle.endpoint(module) {
            Some(endpoint) => endpoint.on_event(event),
            None => tracing::error!("No endpoint for {module:?}, dropping {:?}", event.event_type),
        },
    }
}
