//! Deterministic replay of clock history.
//!
//! Events are ordered parents-first (Kahn's algorithm), with ties between
//! concurrent events broken by CID. Every replica holding the same head
//! replays the same sequence, so last-writer-wins resolves concurrent
//! writes to one document identically everywhere.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use hearth_store::BlockFetcher;
use hearth_types::{Cid, ClockHead, DocId};

use crate::clock::EventFetcher;
use crate::error::CrdtResult;
use crate::event::ClockEvent;

/// Every event reachable from `head` and not from `since`, parents first.
pub async fn replay(
    blocks: &dyn BlockFetcher,
    head: &ClockHead,
    since: &ClockHead,
) -> CrdtResult<Vec<(Cid, ClockEvent)>> {
    let events = EventFetcher::new(blocks);
    let excluded = ancestors(&events, since.iter().copied(), &HashSet::new()).await?;
    let included = ancestors(&events, head.iter().copied(), &excluded).await?;
    let mut fetched: HashMap<Cid, ClockEvent> = HashMap::with_capacity(included.len());
    for cid in &included {
        fetched.insert(*cid, events.get(cid).await?);
    }
    Ok(topological(fetched))
}

/// `start` plus everything below it, stopping at `stop`.
async fn ancestors(
    events: &EventFetcher<'_>,
    start: impl Iterator<Item = Cid>,
    stop: &HashSet<Cid>,
) -> CrdtResult<HashSet<Cid>> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<Cid> = start.collect();
    while let Some(cid) = queue.pop_front() {
        if stop.contains(&cid) || !seen.insert(cid) {
            continue;
        }
        let event = events.get(&cid).await?;
        queue.extend(event.parents);
    }
    Ok(seen)
}

fn topological(mut events: HashMap<Cid, ClockEvent>) -> Vec<(Cid, ClockEvent)> {
    let mut pending: HashMap<Cid, usize> = HashMap::with_capacity(events.len());
    let mut children: HashMap<Cid, Vec<Cid>> = HashMap::new();
    for (cid, event) in &events {
        let inside: Vec<&Cid> = event
            .parents
            .iter()
            .filter(|p| events.contains_key(p))
            .collect();
        pending.insert(*cid, inside.len());
        for parent in inside {
            children.entry(*parent).or_default().push(*cid);
        }
    }

    let mut ready: BTreeSet<Cid> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(cid, _)| *cid)
        .collect();
    let mut order = Vec::with_capacity(events.len());
    while let Some(cid) = ready.pop_first() {
        if let Some(kids) = children.get(&cid) {
            for kid in kids {
                if let Some(n) = pending.get_mut(kid) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*kid);
                    }
                }
            }
        }
        if let Some(event) = events.remove(&cid) {
            order.push((cid, event));
        }
    }
    order
}

/// Latest state of one document after replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocEntry {
    pub value: Option<Cid>,
    pub del: bool,
    /// Event that wrote this state.
    pub clock: Cid,
    /// Position of that event in the replay.
    pub seq: usize,
}

/// Fold replayed events into per-document latest state.
pub fn materialize(events: &[(Cid, ClockEvent)]) -> BTreeMap<DocId, DocEntry> {
    let mut docs = BTreeMap::new();
    for (seq, (cid, event)) in events.iter().enumerate() {
        for update in &event.data.updates {
            docs.insert(
                update.id.clone(),
                DocEntry {
                    value: update.value,
                    del: update.del,
                    clock: *cid,
                    seq,
                },
            );
        }
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventUpdate;
    use hearth_store::{BlockStore, MemoryBlockStore};
    use hearth_types::Codec;

    fn put(store: &MemoryBlockStore, parents: &[Cid], id: &str, body: &[u8]) -> Cid {
        let event = ClockEvent::new(
            parents.to_vec(),
            vec![EventUpdate {
                id: id.into(),
                value: Some(Cid::compute(Codec::DagJson, body)),
                del: false,
            }],
        );
        let block = event.to_block().unwrap();
        let cid = *block.cid();
        store.put(block).unwrap();
        cid
    }

    #[tokio::test]
    async fn parents_come_first() {
        let store = MemoryBlockStore::new();
        let a = put(&store, &[], "x", b"1");
        let b = put(&store, &[a], "x", b"2");
        let c = put(&store, &[b], "y", b"3");
        let order: Vec<Cid> = replay(&store, &ClockHead::single(c), &ClockHead::new())
            .await
            .unwrap()
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[tokio::test]
    async fn since_excludes_known_history() {
        let store = MemoryBlockStore::new();
        let a = put(&store, &[], "x", b"1");
        let b = put(&store, &[a], "y", b"2");
        let c = put(&store, &[b], "z", b"3");
        let events = replay(&store, &ClockHead::single(c), &ClockHead::single(a))
            .await
            .unwrap();
        let ids: Vec<Cid> = events.iter().map(|(cid, _)| *cid).collect();
        assert_eq!(ids, vec![b, c]);
        assert!(replay(&store, &ClockHead::single(c), &ClockHead::single(c))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_writes_resolve_the_same_way_from_either_head_order() {
        let store = MemoryBlockStore::new();
        let root = put(&store, &[], "x", b"root");
        let left = put(&store, &[root], "x", b"left");
        let right = put(&store, &[root], "x", b"right");

        let one = materialize(
            &replay(&store, &ClockHead::from(vec![left, right]), &ClockHead::new())
                .await
                .unwrap(),
        );
        let two = materialize(
            &replay(&store, &ClockHead::from(vec![right, left]), &ClockHead::new())
                .await
                .unwrap(),
        );
        assert_eq!(one, two);
        // Higher CID replays last and wins.
        assert_eq!(one["x"].clock, left.max(right));
    }
}
