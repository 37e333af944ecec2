//! Broadcast + bounded history of dispatched events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{SharingEvent, event::ModuleType};

/// Default number of events kept for late subscribers.
pub const DEFAULT_HISTORY_LEN: usize = 1024;

/// Observer tap over the event loop.
///
/// Late subscribers receive the retained history and then switch to live
/// events without a gap.
pub struct EventLog {
    history: RwLock<VecDeque<SharingEvent>>,
    capacity: usize,
    sender: broadcast::Sender<SharingEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl EventLog {
    /// Create a log retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            sender,
        }
    }

    /// Record an event for live listeners and history.
    pub fn push(&self, event: SharingEvent) {
        let _ = self.sender.send(event.clone());

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity && history.pop_front().is_some() {}
        if self.capacity > 0 {
            history.push_back(event);
        }
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SharingEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SharingEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained events addressed to `module`.
    #[must_use]
    pub fn history_for(&self, module: ModuleType) -> Vec<SharingEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.to_module == module)
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, SharingEvent> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
