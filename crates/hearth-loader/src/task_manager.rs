//! Applies remote meta records at most once each, in batches.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use hearth_types::{CarClockLink, Cid, DbMeta};
use tracing::{debug, warn};

use crate::error::LoaderResult;

/// A meta record announced by a remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEvent {
    pub cid: Cid,
    pub parents: Vec<Cid>,
    pub db_meta: DbMeta,
}

impl From<CarClockLink> for RemoteEvent {
    fn from(link: CarClockLink) -> Self {
        Self {
            cid: link.cid,
            parents: link.parents,
            db_meta: link.db_meta,
        }
    }
}

impl From<&RemoteEvent> for CarClockLink {
    fn from(event: &RemoteEvent) -> Self {
        CarClockLink::new(event.db_meta.clone(), event.parents.clone())
    }
}

/// Applies a batch of remote events to a ledger.
#[async_trait]
pub trait MetaApplier: Send + Sync {
    async fn apply(&self, events: &[RemoteEvent]) -> LoaderResult<()>;
}

#[derive(Default)]
struct TaskState {
    queue: Vec<RemoteEvent>,
    /// Events applied, plus every parent named by an arriving event.
    handled: HashSet<Cid>,
    processing: bool,
    retries: HashMap<Cid, u32>,
}

/// Dedups remote meta events before they reach the applier.
///
/// An event whose CID has been applied, or is a parent of any event seen
/// so far, is redundant: the later event's CAR header already carries its
/// car log. Only one drain loop runs at a time; events arriving meanwhile
/// join the queue and are picked up by that loop.
pub struct TaskManager {
    state: Mutex<TaskState>,
    max_retries: u32,
}

impl TaskManager {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(TaskState::default()),
            max_retries,
        }
    }

    /// Events waiting to be applied.
    pub fn queued(&self) -> usize {
        self.state.lock().expect("lock poisoned").queue.len()
    }

    pub fn is_handled(&self, cid: &Cid) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .handled
            .contains(cid)
    }

    pub async fn handle_event(
        &self,
        event: RemoteEvent,
        applier: &dyn MetaApplier,
    ) -> LoaderResult<()> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.handled.extend(event.parents.iter().copied());
            if state.handled.contains(&event.cid) || state.queue.iter().any(|e| e.cid == event.cid)
            {
                debug!(event = %event.cid.short_hex(), "remote event already handled");
            } else {
                state.queue.push(event);
            }
            if state.processing {
                return Ok(());
            }
            state.processing = true;
        }

        let mut guard = ProcessingGuard {
            state: &self.state,
            armed: true,
        };
        let result = self.drain(applier).await;
        guard.armed = false;
        result
    }

    /// Runs until the queue is empty or the applier fails. Clears the
    /// processing flag under the same lock that observes the exit
    /// condition, so no event can be stranded.
    async fn drain(&self, applier: &dyn MetaApplier) -> LoaderResult<()> {
        loop {
            let batch = {
                let mut state = self.state.lock().expect("lock poisoned");
                let TaskState { queue, handled, .. } = &mut *state;
                queue.retain(|e| !handled.contains(&e.cid));
                if state.queue.is_empty() {
                    state.processing = false;
                    return Ok(());
                }
                state.queue.clone()
            };

            match applier.apply(&batch).await {
                Ok(()) => {
                    let mut state = self.state.lock().expect("lock poisoned");
                    for event in &batch {
                        state.handled.insert(event.cid);
                        state.retries.remove(&event.cid);
                    }
                    debug!(events = batch.len(), "applied remote events");
                }
                Err(e) => {
                    let mut state = self.state.lock().expect("lock poisoned");
                    let mut dropped = Vec::new();
                    for event in &batch {
                        let tries = state.retries.entry(event.cid).or_insert(0);
                        *tries += 1;
                        if *tries > self.max_retries {
                            dropped.push(event.cid);
                        }
                    }
                    for cid in &dropped {
                        warn!(event = %cid.short_hex(), error = %e, "dropping remote event after repeated failures");
                        state.retries.remove(cid);
                    }
                    state.queue.retain(|ev| !dropped.contains(&ev.cid));
                    state.processing = false;
                    return Err(e);
                }
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(3)
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("TaskManager")
            .field("queued", &state.queue.len())
            .field("handled", &state.handled.len())
            .field("processing", &state.processing)
            .finish()
    }
}

/// Clears the processing flag if the drain future is dropped mid-apply.
struct ProcessingGuard<'a> {
    state: &'a Mutex<TaskState>,
    armed: bool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.state.lock() {
                state.processing = false;
            }
        }
    }
}
