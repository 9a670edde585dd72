//! Merkle clock operations.
//!
//! A head is the set of events no other known event descends from.
//! [`advance`] folds one event into a head; folding every tip of another
//! head in any order yields the same result, which is what makes merging
//! commutative and idempotent.

use std::collections::{HashSet, VecDeque};

use hearth_store::BlockFetcher;
use hearth_types::{Cid, ClockHead};

use crate::error::{CrdtError, CrdtResult};
use crate::event::ClockEvent;

/// Reads clock events through a block fetcher.
pub struct EventFetcher<'a> {
    blocks: &'a dyn BlockFetcher,
}

impl<'a> EventFetcher<'a> {
    pub fn new(blocks: &'a dyn BlockFetcher) -> Self {
        Self { blocks }
    }

    /// An unresolvable event is [`CrdtError::MissingBlock`].
    pub async fn get(&self, cid: &Cid) -> CrdtResult<ClockEvent> {
        let block = self
            .blocks
            .fetch(cid)
            .await?
            .ok_or(CrdtError::MissingBlock(*cid))?;
        ClockEvent::from_block(&block)
    }
}

/// Add `event` to `head`.
///
/// - an event already in the head leaves it unchanged,
/// - an event descending from some tips replaces those tips,
/// - an event some tip descends from leaves the head unchanged,
/// - otherwise the event is concurrent and becomes an extra tip.
pub async fn advance(
    blocks: &dyn BlockFetcher,
    head: &ClockHead,
    event: Cid,
) -> CrdtResult<ClockHead> {
    if head.contains(&event) {
        return Ok(head.clone());
    }
    let events = EventFetcher::new(blocks);

    let mut next = head.clone();
    let mut changed = false;
    for tip in head {
        if contains(&events, &event, tip).await? {
            next.remove(tip);
            changed = true;
        }
    }
    if changed {
        next.insert(event);
        return Ok(next);
    }

    for tip in head {
        if contains(&events, tip, &event).await? {
            return Ok(head.clone());
        }
    }
    next.insert(event);
    Ok(next)
}

/// Fold every tip of `other` into `head`.
pub async fn merge_heads(
    blocks: &dyn BlockFetcher,
    head: &ClockHead,
    other: &ClockHead,
) -> CrdtResult<ClockHead> {
    let mut merged = head.clone();
    for tip in other {
        merged = advance(blocks, &merged, *tip).await?;
    }
    Ok(merged)
}

/// Whether event `a` descends from (or is) event `b`. Breadth-first over
/// the parents of `a`.
pub async fn contains(events: &EventFetcher<'_>, a: &Cid, b: &Cid) -> CrdtResult<bool> {
    if a == b {
        return Ok(true);
    }
    let a_event = events.get(a).await?;
    let b_event = events.get(b).await?;

    let mut seen: HashSet<Cid> = HashSet::new();
    let mut queue: VecDeque<Cid> = a_event.parents.into_iter().collect();
    while let Some(link) = queue.pop_front() {
        if link == *b {
            return Ok(true);
        }
        if !seen.insert(link) {
            continue;
        }
        // b cannot lie below one of its own parents.
        if b_event.parents.contains(&link) {
            continue;
        }
        let event = events.get(&link).await?;
        queue.extend(event.parents);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventUpdate;
    use hearth_store::{BlockStore, MemoryBlockStore};
    use proptest::prelude::*;

    fn put(store: &MemoryBlockStore, parents: &[Cid], tag: &str) -> Cid {
        let event = ClockEvent::new(
            parents.to_vec(),
            vec![EventUpdate {
                id: tag.into(),
                value: None,
                del: true,
            }],
        );
        let block = event.to_block().unwrap();
        let cid = *block.cid();
        store.put(block).unwrap();
        cid
    }

    #[tokio::test]
    async fn linear_history_keeps_one_tip() {
        let store = MemoryBlockStore::new();
        let e1 = put(&store, &[], "1");
        let e2 = put(&store, &[e1], "2");
        let head = advance(&store, &ClockHead::new(), e1).await.unwrap();
        let head = advance(&store, &head, e2).await.unwrap();
        assert_eq!(head, ClockHead::single(e2));
        // An ancestor does not move the head back.
        assert_eq!(advance(&store, &head, e1).await.unwrap(), head);
    }

    #[tokio::test]
    async fn concurrent_events_become_tips_until_merged() {
        let store = MemoryBlockStore::new();
        let root = put(&store, &[], "root");
        let left = put(&store, &[root], "left");
        let right = put(&store, &[root], "right");
        let head = advance(&store, &ClockHead::single(root), left).await.unwrap();
        let head = advance(&store, &head, right).await.unwrap();
        assert_eq!(head, ClockHead::from(vec![left, right]));

        let merge = put(&store, &[left, right], "merge");
        let head = advance(&store, &head, merge).await.unwrap();
        assert_eq!(head, ClockHead::single(merge));
    }

    #[tokio::test]
    async fn missing_event_is_an_error() {
        let store = MemoryBlockStore::new();
        let root = put(&store, &[], "root");
        let ghost = Cid::compute(hearth_types::Codec::DagJson, b"ghost");
        assert!(matches!(
            advance(&store, &ClockHead::single(root), ghost).await,
            Err(CrdtError::MissingBlock(c)) if c == ghost
        ));
    }

    #[tokio::test]
    async fn contains_across_diamond() {
        let store = MemoryBlockStore::new();
        let root = put(&store, &[], "root");
        let left = put(&store, &[root], "left");
        let right = put(&store, &[root], "right");
        let top = put(&store, &[left, right], "top");
        let events = EventFetcher::new(&store);
        assert!(contains(&events, &top, &root).await.unwrap());
        assert!(contains(&events, &top, &right).await.unwrap());
        assert!(!contains(&events, &left, &right).await.unwrap());
        assert!(!contains(&events, &root, &top).await.unwrap());
    }

    /// Random DAG: event i picks its parents among events 0..i.
    fn build_dag(shape: &[Vec<usize>]) -> (MemoryBlockStore, Vec<Cid>) {
        let store = MemoryBlockStore::new();
        let mut cids: Vec<Cid> = Vec::new();
        for (i, parents) in shape.iter().enumerate() {
            let parents: Vec<Cid> = if i == 0 {
                vec![]
            } else {
                parents.iter().map(|p| cids[p % i]).collect()
            };
            cids.push(put(&store, &parents, &i.to_string()));
        }
        (store, cids)
    }

    fn head_of(store: &MemoryBlockStore, cids: &[Cid], picks: &[usize]) -> ClockHead {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let mut head = ClockHead::new();
            for p in picks {
                head = advance(store, &head, cids[p % cids.len()]).await.unwrap();
            }
            head
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn merge_is_commutative_and_idempotent(
            shape in prop::collection::vec(prop::collection::vec(0usize..64, 1..3), 1..12),
            a_picks in prop::collection::vec(0usize..64, 1..5),
            b_picks in prop::collection::vec(0usize..64, 1..5),
        ) {
            let (store, cids) = build_dag(&shape);
            let a = head_of(&store, &cids, &a_picks);
            let b = head_of(&store, &cids, &b_picks);

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (ab, ba, aa) = rt.block_on(async {
                (
                    merge_heads(&store, &a, &b).await.unwrap(),
                    merge_heads(&store, &b, &a).await.unwrap(),
                    merge_heads(&store, &a, &a).await.unwrap(),
                )
            });
            prop_assert_eq!(&ab, &ba);
            prop_assert_eq!(&aa, &a);
        }
    }
}
