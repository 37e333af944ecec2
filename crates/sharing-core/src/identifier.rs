//! Monotonic id minting for contexts and agents.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::INVALID_ID;

/// Process-wide id source, owned by the composition root and shared by handle.
///
/// Ids start at 1 and never take the value [`INVALID_ID`].
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Mint the next id.
    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != INVALID_ID && id != 0 {
                return id;
            }
        }
    }
}
