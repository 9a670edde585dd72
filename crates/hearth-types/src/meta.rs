use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cid::Cid;

/// Pointer record written to the meta store: the latest committed CAR and
/// the fingerprint of the key that encrypted it (`None` when unencrypted).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbMeta {
    pub car: Cid,
    pub key: Option<String>,
}

impl DbMeta {
    pub fn new(car: Cid, key: Option<String>) -> Self {
        Self { car, key }
    }
}

/// A meta record together with the meta records it supersedes.
///
/// The meta store holds a list of these; more than one entry means
/// concurrent writers have advanced the ledger independently and the
/// entries have not been merged yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarClockLink {
    /// Always equal to `db_meta.car`.
    pub cid: Cid,
    pub parents: Vec<Cid>,
    pub db_meta: DbMeta,
}

impl CarClockLink {
    pub fn new(db_meta: DbMeta, parents: Vec<Cid>) -> Self {
        Self {
            cid: db_meta.car,
            parents,
            db_meta,
        }
    }
}

/// The causal frontier of a ledger: the tips of its Merkle clock.
///
/// Kept sorted and duplicate-free so that two heads with the same members
/// compare equal regardless of the order tips were added. The "no tip is an
/// ancestor of another" invariant needs the clock blocks to check and is
/// maintained by the clock's `advance`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Cid>", into = "Vec<Cid>")]
pub struct ClockHead(Vec<Cid>);

impl ClockHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(cid: Cid) -> Self {
        Self(vec![cid])
    }

    pub fn tips(&self) -> &[Cid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.0.binary_search(cid).is_ok()
    }

    /// Add a tip. Returns `false` if it was already present.
    pub fn insert(&mut self, cid: Cid) -> bool {
        match self.0.binary_search(&cid) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, cid);
                true
            }
        }
    }

    /// Remove a tip. Returns `true` if it was present.
    pub fn remove(&mut self, cid: &Cid) -> bool {
        match self.0.binary_search(cid) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cid> {
        self.0.iter()
    }
}

impl From<Vec<Cid>> for ClockHead {
    fn from(cids: Vec<Cid>) -> Self {
        cids.into_iter().collect()
    }
}

impl From<ClockHead> for Vec<Cid> {
    fn from(head: ClockHead) -> Self {
        head.0
    }
}

impl FromIterator<Cid> for ClockHead {
    fn from_iter<I: IntoIterator<Item = Cid>>(iter: I) -> Self {
        let set: BTreeSet<Cid> = iter.into_iter().collect();
        Self(set.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ClockHead {
    type Item = &'a Cid;
    type IntoIter = std::slice::Iter<'a, Cid>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Description of what a commit changed, stored in the CAR header.
///
/// `head` is the clock head after the commit; anything else a writer wants
/// to record travels in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub head: ClockHead,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionMeta {
    pub fn new(head: ClockHead) -> Self {
        Self {
            head,
            extra: Map::new(),
        }
    }
}
