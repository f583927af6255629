//! Transition guard serializing start/stop.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Mutual-exclusion guard held for the whole of a start or stop.
///
/// External callers use [`try_acquire`](Self::try_acquire) and are turned
/// away while a transition runs. Internal recovery paths use
/// [`acquire`](Self::acquire), which queues behind the running transition.
/// Queued waiters are served before any later `try_acquire`.
#[derive(Debug, Clone)]
pub struct TransitionGuard {
    permits: Arc<Semaphore>,
}

impl Default for TransitionGuard {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }
}

impl TransitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<TransitionPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| TransitionPermit { _permit: permit })
    }

    /// Wait for the guard. `None` only if the guard was closed.
    pub async fn acquire(&self) -> Option<TransitionPermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| TransitionPermit { _permit: permit })
    }

    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

/// Proof of holding the guard. Releases it on drop, including on panic.
#[derive(Debug)]
pub struct TransitionPermit {
    _permit: OwnedSemaphorePermit,
}
