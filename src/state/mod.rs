//! Shared daemon state: the player roster, the score sync phase machine and the
//! process-wide shutdown flag.

/// Four-slot player roster.
pub mod roster;
/// Per-category score sync phases.
pub mod sync_machine;

use std::sync::Arc;

use tokio::sync::watch;

pub use self::roster::{PlayerSlot, Roster, SLOT_COUNT, SlotPosition};
pub use self::sync_machine::{CategoryMachine, ScoreCategory, SyncEvent, SyncPhase};

#[derive(Debug, Clone)]
/// Cloneable shutdown flag observed by every long-lived loop.
///
/// Flipping it is one-way; loops notice it at their next wake point.
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a flag in the running state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown and wake every subscriber.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Obtain a waitable handle on the flag.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
/// Receiving side of a [`Shutdown`] flag.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been requested. Returns immediately if it already was.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}
