//! Write-ahead log of commits the remote has not acknowledged yet.

use std::collections::HashSet;
use std::sync::Mutex;

use hearth_types::{CarClockLink, Cid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WalRetryConfig;
use crate::error::{LoaderError, LoaderResult};
use crate::stores::{DataStore, RemoteStores, WalStore};

/// One pending remote write: upload `cars`, then publish `link` to the
/// remote meta store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalOperation {
    pub cars: Vec<Cid>,
    pub link: CarClockLink,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl WalOperation {
    pub fn new(cars: Vec<Cid>, link: CarClockLink) -> Self {
        Self {
            cars,
            link,
            attempts: 0,
        }
    }
}

/// Everything not yet acknowledged by the remote, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalState {
    pub operations: Vec<WalOperation>,
}

/// Durable queue of local commits awaiting upload.
///
/// Delivery is at-least-once: an operation is removed only after both its
/// CARs and its meta link were written to the remote, and the queue is
/// persisted after every change. An operation that keeps failing stays at
/// the front and is retried by the next [`process`](Self::process), so
/// later operations never overtake it.
pub struct RemoteWal {
    store: WalStore,
    state: Mutex<WalState>,
    processing: tokio::sync::Mutex<()>,
    persisting: tokio::sync::Mutex<()>,
    retry: WalRetryConfig,
}

impl RemoteWal {
    pub fn new(store: WalStore, retry: WalRetryConfig) -> Self {
        Self {
            store,
            state: Mutex::new(WalState::default()),
            processing: tokio::sync::Mutex::new(()),
            persisting: tokio::sync::Mutex::new(()),
            retry,
        }
    }

    /// Replace the in-memory queue with the persisted one. Returns the
    /// number of pending operations.
    pub async fn load(&self) -> LoaderResult<usize> {
        let state = self.store.load().await?;
        let pending = state.operations.len();
        *self.state.lock().expect("lock poisoned") = state;
        if pending > 0 {
            info!(pending, "remote wal has pending operations");
        }
        Ok(pending)
    }

    pub fn pending(&self) -> usize {
        self.state.lock().expect("lock poisoned").operations.len()
    }

    pub fn operations(&self) -> Vec<WalOperation> {
        self.state.lock().expect("lock poisoned").operations.clone()
    }

    /// Append an operation and persist the queue before returning.
    pub async fn enqueue(&self, op: WalOperation) -> LoaderResult<()> {
        debug!(car = %op.link.cid.short_hex(), cars = op.cars.len(), "remote wal enqueue");
        self.state
            .lock()
            .expect("lock poisoned")
            .operations
            .push(op);
        self.persist().await
    }

    async fn persist(&self) -> LoaderResult<()> {
        // Snapshot under the persist lock so the newest state is written last.
        let _persisting = self.persisting.lock().await;
        let snapshot = self.state.lock().expect("lock poisoned").clone();
        self.store.save(&snapshot).await
    }

    /// Deliver pending operations in order. Returns how many were
    /// acknowledged.
    ///
    /// `car_log` is the local car log: a CAR missing from `local` is only
    /// tolerated when it is no longer in the log (it was compacted away).
    pub async fn process(
        &self,
        local: &DataStore,
        remote: &RemoteStores,
        car_log: &[Cid],
    ) -> LoaderResult<usize> {
        let _processing = self.processing.lock().await;
        let mut sent = 0;
        loop {
            let next = self
                .state
                .lock()
                .expect("lock poisoned")
                .operations
                .first()
                .cloned();
            let Some(op) = next else { break };

            self.deliver_with_retry(&op, local, remote, car_log).await?;

            {
                let mut state = self.state.lock().expect("lock poisoned");
                if let Some(pos) = state
                    .operations
                    .iter()
                    .position(|o| o.link.cid == op.link.cid)
                {
                    state.operations.remove(pos);
                }
            }
            self.persist().await?;
            sent += 1;
        }
        if sent > 0 {
            info!(sent, "remote wal flushed");
        }
        Ok(sent)
    }

    async fn deliver_with_retry(
        &self,
        op: &WalOperation,
        local: &DataStore,
        remote: &RemoteStores,
        car_log: &[Cid],
    ) -> LoaderResult<()> {
        let mut backoff = self.retry.initial_backoff();
        let mut attempt = 0;
        loop {
            match deliver(op, local, remote, car_log).await {
                Ok(()) => return Ok(()),
                Err(e @ LoaderError::MissingCar(_)) => return Err(e),
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        car = %op.link.cid.short_hex(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "remote write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.retry.next_backoff(backoff);
                }
                Err(e) => {
                    let attempts = attempt + 1;
                    {
                        let mut state = self.state.lock().expect("lock poisoned");
                        if let Some(pending) = state
                            .operations
                            .iter_mut()
                            .find(|o| o.link.cid == op.link.cid)
                        {
                            pending.attempts += attempts;
                        }
                    }
                    self.persist().await?;
                    warn!(car = %op.link.cid.short_hex(), attempts, error = %e, "remote write gave up");
                    return Err(LoaderError::WalRetriesExhausted {
                        attempts,
                        last: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Operations that bring a WAL holding `pending` up to date with a car log
/// of `cars` (newest first) whose unsuperseded links are `frontier`.
///
/// Each frontier link not yet queued gets an operation; the first one also
/// carries every car no pending operation uploads. Cars left over when all
/// links are queued ride on the first frontier link.
pub fn missing_operations(
    pending: &[WalOperation],
    cars: &[Cid],
    frontier: &[CarClockLink],
) -> Vec<WalOperation> {
    let queued_cars: HashSet<Cid> = pending
        .iter()
        .flat_map(|op| op.cars.iter().copied())
        .collect();
    let queued_links: HashSet<Cid> = pending.iter().map(|op| op.link.cid).collect();
    let mut unsent: Vec<Cid> = cars
        .iter()
        .copied()
        .filter(|c| !queued_cars.contains(c))
        .collect();

    let mut ops = Vec::new();
    for link in frontier {
        if queued_links.contains(&link.cid) {
            continue;
        }
        let mut op_cars = std::mem::take(&mut unsent);
        if !op_cars.contains(&link.cid) {
            op_cars.insert(0, link.cid);
        }
        ops.push(WalOperation::new(op_cars, link.clone()));
    }
    if !unsent.is_empty() {
        if let Some(link) = frontier.first() {
            ops.push(WalOperation::new(unsent, link.clone()));
        }
    }
    ops
}

async fn deliver(
    op: &WalOperation,
    local: &DataStore,
    remote: &RemoteStores,
    car_log: &[Cid],
) -> LoaderResult<()> {
    let mut skipped = HashSet::new();
    for car in &op.cars {
        match local.load(car).await? {
            Some(block) => remote.data.save(&block).await?,
            None if car_log.contains(car) => return Err(LoaderError::MissingCar(*car)),
            None => {
                debug!(car = %car.short_hex(), "car compacted away before upload");
                skipped.insert(*car);
            }
        }
    }
    if skipped.contains(&op.link.cid) {
        return Ok(());
    }

    let mut links = remote.meta.load().await?;
    links.retain(|l| l.cid != op.link.cid && !op.link.parents.contains(&l.cid));
    links.push(op.link.clone());
    remote.meta.save(&links).await
}

impl std::fmt::Debug for RemoteWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWal")
            .field("pending", &self.pending())
            .field("retry", &self.retry)
            .finish()
    }
}
