//! Block locators: compact hash lists a wallet persists to remember
//! where it last saw the chain.

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::index::LoadedIndex;
use crate::Hash256;

const MAX_LOCATOR_HASHES: u64 = 2000;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockLocator {
    pub hashes: Vec<Hash256>,
}

impl BlockLocator {
    pub fn new(hashes: Vec<Hash256>) -> Self {
        Self { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            encoder.write_hash(hash);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let count = decoder.read_varint()?;
        if count > MAX_LOCATOR_HASHES {
            return Err(DecodeError::SizeTooLarge);
        }
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            hashes.push(decoder.read_hash()?);
        }
        decoder.finish()?;
        Ok(Self { hashes })
    }

    /// Height of the first locator hash known to the index. Hashes are
    /// ordered newest first, so the first match is the best resume
    /// point. `None` when nothing matches; callers treat that as a
    /// full-history resume from genesis.
    pub fn resolve_height(&self, index: &LoadedIndex) -> Option<i32> {
        for hash in &self.hashes {
            if let Some(entry) = index.get(hash) {
                return Some(entry.height);
            }
        }
        None
    }
}
