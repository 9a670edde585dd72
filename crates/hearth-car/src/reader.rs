//! Decoding of CAR envelopes, plain or encrypted.

use bytes::Bytes;
use hearth_crypto::{ContentHasher, KeyedCrypto};
use hearth_types::{Block, Cid, Codec};

use crate::error::{CarError, CarResult};
use crate::header::CarHeader;
use crate::{varint, CHECKSUM_LEN, MAGIC, MAX_FIELD_LEN, VERSION};

const PREAMBLE_LEN: usize = 8;

/// Parsed CAR envelope.
///
/// Construction validates the magic, version, checksum and header. Blocks
/// are decoded lazily by [`blocks`](Self::blocks).
#[derive(Clone, Debug)]
pub struct CarReader {
    data: Bytes,
    header: CarHeader,
    body_start: usize,
    body_end: usize,
}

impl CarReader {
    pub fn from_bytes(data: impl Into<Bytes>) -> CarResult<Self> {
        let data = data.into();
        if data.len() < PREAMBLE_LEN + 1 + CHECKSUM_LEN {
            return Err(CarError::Truncated {
                offset: data.len(),
                reason: "car data too short".into(),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(CarError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&data[4..8]);
        let version = u32::from_be_bytes(version_bytes);
        if version != VERSION {
            return Err(CarError::UnsupportedVersion(version));
        }

        let body_end = data.len() - CHECKSUM_LEN;
        let mut expected = [0u8; CHECKSUM_LEN];
        expected.copy_from_slice(&data[body_end..]);
        if !ContentHasher::CHECKSUM.verify(&data[..body_end], &expected) {
            return Err(CarError::ChecksumMismatch);
        }

        let (header_bytes, body_start) = read_field(&data[..body_end], PREAMBLE_LEN)?;
        let header: CarHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| CarError::InvalidHeader(e.to_string()))?;
        if header.version != VERSION {
            return Err(CarError::UnsupportedVersion(header.version));
        }

        Ok(Self {
            data,
            header,
            body_start,
            body_end,
        })
    }

    /// Parse a `car` block, checking that it hashes to its CID first.
    pub fn from_block(block: &Block) -> CarResult<Self> {
        if block.cid().codec() != Codec::Car || !block.verify() {
            return Err(CarError::HashMismatch { cid: *block.cid() });
        }
        Self::from_bytes(block.bytes().clone())
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// Lazily decode the blocks in envelope order.
    ///
    /// Each call starts from the first block. Encrypted envelopes need the
    /// key whose fingerprint the header names. Every block is checked
    /// against its CID; the iterator yields the first error it meets and
    /// then ends.
    pub fn blocks<'a>(&'a self, crypto: Option<&'a KeyedCrypto>) -> CarBlocks<'a> {
        CarBlocks {
            reader: self,
            crypto,
            pos: self.body_start,
            done: false,
        }
    }

    /// Decode every block, failing on the first bad one.
    pub fn read_all(&self, crypto: Option<&KeyedCrypto>) -> CarResult<Vec<Block>> {
        self.blocks(crypto).collect()
    }
}

/// Iterator returned by [`CarReader::blocks`].
pub struct CarBlocks<'a> {
    reader: &'a CarReader,
    crypto: Option<&'a KeyedCrypto>,
    pos: usize,
    done: bool,
}

impl CarBlocks<'_> {
    fn open(&self, payload: &[u8]) -> CarResult<Vec<u8>> {
        match (&self.reader.header.key, self.crypto) {
            (None, _) => Ok(payload.to_vec()),
            (Some(expected), None) => Err(CarError::MissingKey(expected.clone())),
            (Some(expected), Some(crypto)) => {
                if crypto.fingerprint() != expected.as_str() {
                    return Err(CarError::KeyMismatch {
                        expected: expected.clone(),
                        actual: crypto.fingerprint().to_string(),
                    });
                }
                Ok(crypto.decrypt(payload)?)
            }
        }
    }

    fn next_block(&mut self) -> CarResult<Block> {
        let body = &self.reader.data[..self.reader.body_end];
        let start = self.pos;
        let (len, used) = varint::decode(&body[start..], start)?;
        if len > MAX_FIELD_LEN {
            return Err(CarError::FieldTooLarge { offset: start, len });
        }
        let cid_start = start + used;
        let payload_start = cid_start + Cid::ENCODED_LEN;
        let payload_end = payload_start + len as usize;
        if payload_end > body.len() {
            return Err(CarError::Truncated {
                offset: start,
                reason: format!("section needs {} bytes, {} left", payload_end - start, body.len() - start),
            });
        }
        let cid = Cid::from_slice(&body[cid_start..payload_start])?;
        let plain = self.open(&body[payload_start..payload_end])?;
        self.pos = payload_end;
        Block::with_cid(cid, plain).map_err(|_| CarError::HashMismatch { cid })
    }
}

impl Iterator for CarBlocks<'_> {
    type Item = CarResult<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.reader.body_end {
            return None;
        }
        let item = self.next_block();
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

/// Read a varint-prefixed field starting at `offset`.
/// Returns the field and the offset just past it.
fn read_field(data: &[u8], offset: usize) -> CarResult<(&[u8], usize)> {
    let (len, used) = varint::decode(&data[offset..], offset)?;
    if len > MAX_FIELD_LEN {
        return Err(CarError::FieldTooLarge { offset, len });
    }
    let start = offset + used;
    let end = start + len as usize;
    if end > data.len() {
        return Err(CarError::Truncated {
            offset,
            reason: "field extends past end of data".into(),
        });
    }
    Ok((&data[start..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{encode_envelope, CarWriter};
    use hearth_crypto::SymmetricKey;
    use hearth_types::TransactionMeta;
    use proptest::prelude::*;

    fn raw(data: &[u8]) -> Block {
        Block::new(Codec::Raw, data.to_vec())
    }

    fn pack(blocks: &[Block], crypto: Option<KeyedCrypto>) -> Block {
        let roots = blocks.iter().take(1).map(|b| *b.cid()).collect();
        let mut writer = CarWriter::new(roots);
        if let Some(c) = crypto {
            writer = writer.with_crypto(c);
        }
        writer.add_blocks(blocks.iter().cloned());
        writer.finish().unwrap()
    }

    /// Re-seal an envelope with a correct checksum after tampering.
    fn reseal(mut body: Vec<u8>) -> Vec<u8> {
        body.truncate(body.len() - CHECKSUM_LEN);
        let checksum = ContentHasher::CHECKSUM.hash(&body);
        body.extend_from_slice(&checksum);
        body
    }

    // ---------------------------------------------------------------
    // Round trips
    // ---------------------------------------------------------------

    #[test]
    fn plain_roundtrip() {
        let blocks = vec![raw(b"one"), raw(b"two"), raw(b"three")];
        let car = pack(&blocks, None);
        let reader = CarReader::from_block(&car).unwrap();
        assert_eq!(reader.roots(), &[*blocks[0].cid()]);
        assert_eq!(reader.read_all(None).unwrap(), blocks);
    }

    #[test]
    fn encrypted_roundtrip() {
        let crypto = KeyedCrypto::new(SymmetricKey::generate());
        let blocks = vec![raw(b"secret-a"), raw(b"secret-b")];
        let car = pack(&blocks, Some(crypto.clone()));
        let reader = CarReader::from_block(&car).unwrap();
        assert_eq!(reader.header().key.as_deref(), Some(crypto.fingerprint()));
        assert_eq!(reader.read_all(Some(&crypto)).unwrap(), blocks);
    }

    #[test]
    fn header_meta_survives() {
        let root = raw(b"root");
        let meta = TransactionMeta::new(vec![*root.cid()].into());
        let mut writer = CarWriter::new(vec![*root.cid()])
            .with_meta(meta.clone())
            .with_car_log(vec![Cid::compute(Codec::Car, b"prev")]);
        writer.add_block(root);
        let reader = CarReader::from_block(&writer.finish().unwrap()).unwrap();
        assert_eq!(reader.header().meta.as_ref(), Some(&meta));
        assert_eq!(reader.header().cars.len(), 1);
    }

    #[test]
    fn blocks_iterator_is_restartable_and_lazy() {
        let blocks = vec![raw(b"a"), raw(b"b")];
        let reader = CarReader::from_block(&pack(&blocks, None)).unwrap();
        let mut iter = reader.blocks(None);
        assert_eq!(iter.next().unwrap().unwrap(), blocks[0]);
        assert_eq!(reader.blocks(None).count(), 2);
        assert_eq!(iter.next().unwrap().unwrap(), blocks[1]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn empty_car() {
        let reader = CarReader::from_block(&pack(&[], None)).unwrap();
        assert!(reader.read_all(None).unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // Decode errors
    // ---------------------------------------------------------------

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = pack(&[raw(b"x")], None).bytes().to_vec();
        bytes[0] = b'X';
        let err = CarReader::from_bytes(reseal(bytes)).unwrap_err();
        assert!(matches!(err, CarError::InvalidMagic { .. }));
        assert!(err.is_decode());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = pack(&[raw(b"x")], None).bytes().to_vec();
        bytes[4..8].copy_from_slice(&9u32.to_be_bytes());
        let err = CarReader::from_bytes(reseal(bytes)).unwrap_err();
        assert!(matches!(err, CarError::UnsupportedVersion(9)));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = pack(&[raw(b"some payload")], None).bytes().to_vec();
        for cut in [0, 5, 20, bytes.len() - 1] {
            let err = CarReader::from_bytes(bytes[..cut].to_vec()).unwrap_err();
            assert!(err.is_decode(), "cut at {cut}: {err}");
        }
    }

    #[test]
    fn rejects_flipped_bit() {
        let mut bytes = pack(&[raw(b"payload")], None).bytes().to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(matches!(
            CarReader::from_bytes(bytes),
            Err(CarError::ChecksumMismatch)
        ));
    }

    #[test]
    fn rejects_hash_mismatched_block() {
        let honest = raw(b"honest");
        let header = CarHeader::new(vec![*honest.cid()]);
        let forged = encode_envelope(&header, &[(*honest.cid(), b"forged".to_vec())]).unwrap();
        let reader = CarReader::from_bytes(forged).unwrap();
        let results: Vec<_> = reader.blocks(None).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(CarError::HashMismatch { cid }) if cid == honest.cid()
        ));
    }

    #[test]
    fn rejects_section_overrun() {
        let honest = raw(b"abc");
        let header = CarHeader::new(vec![]);
        let mut bytes =
            encode_envelope(&header, &[(*honest.cid(), b"abc".to_vec())]).unwrap();
        // Drop the payload but keep a valid checksum.
        bytes.truncate(bytes.len() - CHECKSUM_LEN - 3);
        bytes.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        let reader = CarReader::from_bytes(reseal(bytes)).unwrap();
        let err = reader.read_all(None).unwrap_err();
        assert!(matches!(err, CarError::Truncated { .. }));
    }

    #[test]
    fn encrypted_needs_right_key() {
        let crypto = KeyedCrypto::new(SymmetricKey::generate());
        let other = KeyedCrypto::new(SymmetricKey::generate());
        let reader = CarReader::from_block(&pack(&[raw(b"s")], Some(crypto))).unwrap();
        assert!(matches!(
            reader.read_all(None),
            Err(CarError::MissingKey(_))
        ));
        assert!(matches!(
            reader.read_all(Some(&other)),
            Err(CarError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn from_block_checks_car_cid() {
        let car = pack(&[raw(b"x")], None);
        let wrong = Block::new(Codec::Raw, car.bytes().clone());
        assert!(matches!(
            CarReader::from_block(&wrong),
            Err(CarError::HashMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn packed_bytes_come_back_verified(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 0..12),
            encrypt in any::<bool>(),
        ) {
            let mut blocks: Vec<Block> = Vec::new();
            for p in &payloads {
                let b = raw(p);
                if !blocks.iter().any(|x| x.cid() == b.cid()) {
                    blocks.push(b);
                }
            }
            let crypto = encrypt.then(|| KeyedCrypto::new(SymmetricKey::generate()));
            let car = pack(&blocks, crypto.clone());
            let reader = CarReader::from_block(&car).unwrap();
            let back = reader.read_all(crypto.as_ref()).unwrap();
            prop_assert_eq!(back.len(), blocks.len());
            for (got, want) in back.iter().zip(&blocks) {
                prop_assert_eq!(got, want);
                prop_assert!(got.cid().verify(got.bytes()));
            }
        }
    }
}
