use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;

/// Bounds the number of live sessions.
///
/// The semaphore holds `hard_limit` permits. The accept loop takes one before
/// each accept and hands it to the session with [`AdmissionGate::occupy`], so
/// at most `hard_limit` sessions run at once. Above the soft limit every
/// admission is delayed by the backoff.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    sessions: Arc<AtomicUsize>,
    soft_limit: usize,
    backoff: Duration,
}

/// A running session's claim on the gate. Dropping it frees the slot.
#[derive(Debug)]
pub struct SessionSlot {
    _permit: OwnedSemaphorePermit,
    sessions: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    pub fn new(soft_limit: usize, hard_limit: usize, backoff: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(hard_limit)),
            sessions: Arc::new(AtomicUsize::new(0)),
            soft_limit,
            backoff,
        }
    }

    /// Sessions currently running. A permit waiting on `accept` is not one.
    pub fn live(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Wait until another session may start.
    pub async fn admit(&self) -> OwnedSemaphorePermit {
        if self.live() > self.soft_limit {
            time::sleep(self.backoff).await;
        }

        // The semaphore is never closed.
        match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("admission semaphore closed"),
        }
    }

    /// Count a session as live for as long as the slot is held.
    pub fn occupy(&self, permit: OwnedSemaphorePermit) -> SessionSlot {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        SessionSlot {
            _permit: permit,
            sessions: self.sessions.clone(),
        }
    }
}
