//! Serializes mutations of one ledger.

use std::future::Future;

use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Serializes every operation that changes the car log.
///
/// Commits, compactions and remote merges all run through
/// [`enqueue`](Self::enqueue). At most one runs at a time and they start in
/// arrival order (the queue is a FIFO tokio mutex). Callers get their
/// work's result back directly.
pub struct CommitQueue {
    running: Mutex<()>,
    pending: watch::Sender<usize>,
}

impl CommitQueue {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            running: Mutex::new(()),
            pending,
        }
    }

    /// Run `work` once every earlier item has finished.
    pub async fn enqueue<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let _slot = PendingSlot::new(&self.pending);
        let _running = self.running.lock().await;
        work.await
    }

    /// Items waiting or running.
    pub fn len(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the queue drains.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in self, so this cannot fail while we hold &self.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}

impl Default for CommitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Counts one queued item for as long as it lives, including when the
/// enqueued future is dropped before it runs.
struct PendingSlot<'a>(&'a watch::Sender<usize>);

impl<'a> PendingSlot<'a> {
    fn new(pending: &'a watch::Sender<usize>) -> Self {
        pending.send_modify(|n| *n += 1);
        let depth = *pending.borrow();
        if depth > 1 {
            debug!(depth, "commit queue busy");
        }
        Self(pending)
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
        if *self.0.borrow() == 0 {
            debug!("commit queue idle");
        }
    }
}
