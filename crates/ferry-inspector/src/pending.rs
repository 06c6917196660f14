use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::types::{InspectorError, Result};

/// Correlation table for request/reply protocols.
///
/// Each registered call owns a oneshot slot keyed by a fresh, monotonically
/// increasing id. Slots leave the table exactly once: when completed, when the
/// waiter times out or is cancelled, or when [`PendingCalls::fail_all`] drains
/// the table on disconnect.
#[derive(Debug)]
pub struct PendingCalls<T> {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, oneshot::Sender<Result<T>>>>,
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self) -> (u64, oneshot::Receiver<Result<T>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slots.lock().insert(id, tx);
        (id, rx)
    }

    /// Resolve `id`. Returns `false` when nobody is waiting for it any more.
    pub fn complete(&self, id: u64, result: Result<T>) -> bool {
        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, id: u64) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Reject every outstanding call with `err`; returns how many were waiting.
    pub fn fail_all(&self, err: InspectorError) -> usize {
        let drained = std::mem::take(&mut *self.slots.lock());
        let count = drained.len();
        for (_id, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the reply to `id`, bounded by `timeout` and `cancel`.
    ///
    /// The slot is removed on timeout or cancellation so late replies are dropped.
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<T>>,
        timeout: Duration,
        cancel: &CancellationToken,
        on_timeout: impl FnOnce() -> InspectorError,
    ) -> Result<T> {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.remove(id);
                Err(InspectorError::Cancelled)
            }
            res = tokio::time::timeout(timeout, rx) => match res {
                Ok(Ok(reply)) => reply,
                Ok(Err(_closed)) => Err(InspectorError::ConnectionClosed),
                Err(_elapsed) => {
                    self.remove(id);
                    Err(on_timeout())
                }
            },
        }
    }
}
