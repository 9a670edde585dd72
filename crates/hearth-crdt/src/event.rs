use hearth_types::{Block, Cid, DocId};
use serde::{Deserialize, Serialize};

use crate::error::{CrdtError, CrdtResult};

/// One document mutation recorded in a clock event. `value` is the CID of
/// the document body block; `None` for deletes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub id: DocId,
    pub value: Option<Cid>,
    #[serde(default)]
    pub del: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub updates: Vec<EventUpdate>,
}

/// A node of the Merkle clock. Its parents are the head it was written
/// on top of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEvent {
    pub parents: Vec<Cid>,
    pub data: EventData,
}

impl ClockEvent {
    pub fn new(mut parents: Vec<Cid>, updates: Vec<EventUpdate>) -> Self {
        parents.sort();
        parents.dedup();
        Self {
            parents,
            data: EventData { updates },
        }
    }

    pub fn to_block(&self) -> CrdtResult<Block> {
        Ok(Block::encode_json(self)?)
    }

    pub fn from_block(block: &Block) -> CrdtResult<Self> {
        block.decode_json().map_err(|e| CrdtError::InvalidEvent {
            cid: *block.cid(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::Codec;

    #[test]
    fn parents_are_canonical() {
        let a = Cid::compute(Codec::DagJson, b"a");
        let b = Cid::compute(Codec::DagJson, b"b");
        let one = ClockEvent::new(vec![b, a, b], vec![]);
        let two = ClockEvent::new(vec![a, b], vec![]);
        assert_eq!(one.parents.len(), 2);
        assert_eq!(one.to_block().unwrap().cid(), two.to_block().unwrap().cid());
    }

    #[test]
    fn block_roundtrip() {
        let value = Cid::compute(Codec::DagJson, b"{}");
        let event = ClockEvent::new(
            vec![],
            vec![
                EventUpdate {
                    id: "a".into(),
                    value: Some(value),
                    del: false,
                },
                EventUpdate {
                    id: "b".into(),
                    value: None,
                    del: true,
                },
            ],
        );
        let block = event.to_block().unwrap();
        assert_eq!(block.cid().codec(), Codec::DagJson);
        assert_eq!(ClockEvent::from_block(&block).unwrap(), event);
    }

    #[test]
    fn non_event_block_is_rejected() {
        let block = Block::encode_json(&serde_json::json!({"_id": "doc"})).unwrap();
        assert!(matches!(
            ClockEvent::from_block(&block),
            Err(CrdtError::InvalidEvent { .. })
        ));
    }
}
