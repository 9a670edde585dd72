use hearth_crypto::{ContentHasher, KeyedCrypto};
use hearth_types::{Block, Cid, Codec, TransactionMeta};
use tracing::debug;

use crate::error::{CarError, CarResult};
use crate::header::CarHeader;
use crate::{varint, MAGIC, VERSION};

/// Builds one CAR envelope from a header and a batch of blocks.
pub struct CarWriter {
    header: CarHeader,
    blocks: Vec<Block>,
    crypto: Option<KeyedCrypto>,
}

impl CarWriter {
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            header: CarHeader::new(roots),
            blocks: Vec::new(),
            crypto: None,
        }
    }

    pub fn with_meta(mut self, meta: TransactionMeta) -> Self {
        self.header.meta = Some(meta);
        self
    }

    /// Record the car log this CAR extends.
    pub fn with_car_log(mut self, cars: Vec<Cid>) -> Self {
        self.header.cars = cars;
        self
    }

    /// Mark this CAR as a compaction superseding `cars`.
    pub fn with_compacted(mut self, cars: Vec<Cid>) -> Self {
        self.header.compact = cars;
        self
    }

    /// Seal every payload with `crypto`.
    pub fn with_crypto(mut self, crypto: KeyedCrypto) -> Self {
        self.header.key = Some(crypto.fingerprint().to_string());
        self.crypto = Some(crypto);
        self
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn add_blocks(&mut self, blocks: impl IntoIterator<Item = Block>) {
        self.blocks.extend(blocks);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Encode the envelope and return it as a `car` block.
    pub fn finish(self) -> CarResult<Block> {
        let mut sections = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let payload = match &self.crypto {
                Some(crypto) => crypto.encrypt(block.bytes())?,
                None => block.bytes().to_vec(),
            };
            sections.push((*block.cid(), payload));
        }
        let envelope = encode_envelope(&self.header, &sections)?;
        let car = Block::new(Codec::Car, envelope);
        debug!(
            car = %car.cid().short_hex(),
            blocks = sections.len(),
            len = car.len(),
            encrypted = self.crypto.is_some(),
            "packed car"
        );
        Ok(car)
    }
}

/// Serialize a header and pre-sealed sections into envelope bytes.
pub(crate) fn encode_envelope(header: &CarHeader, sections: &[(Cid, Vec<u8>)]) -> CarResult<Vec<u8>> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| CarError::Serialization(e.to_string()))?;

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_be_bytes());
    varint::encode(&mut buf, header_json.len() as u64);
    buf.extend_from_slice(&header_json);

    for (cid, payload) in sections {
        varint::encode(&mut buf, payload.len() as u64);
        buf.extend_from_slice(&cid.to_bytes());
        buf.extend_from_slice(payload);
    }

    let checksum = ContentHasher::CHECKSUM.hash(&buf);
    buf.extend_from_slice(&checksum);
    Ok(buf)
}
