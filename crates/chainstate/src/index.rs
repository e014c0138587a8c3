//! Persisted block index and its in-memory image.
//!
//! Entries are written once by validation and never rewritten; the
//! loader only reads them back and picks the tip. Parent links are
//! resolved by hash lookup into the arena, never by owning references.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use onyx_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use primitive_types::U256;

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::Hash256;

const ENTRY_LEN: usize = 80;
const INTERRUPT_CHECK_INTERVAL: usize = 4096;

pub const ZERO_HASH: Hash256 = [0u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockIndexEntry {
    pub prev_hash: Hash256,
    pub height: i32,
    pub chainwork: [u8; 32],
    pub file_number: u32,
    pub file_offset: u64,
}

impl BlockIndexEntry {
    pub fn chainwork_value(&self) -> U256 {
        U256::from_big_endian(&self.chainwork)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash(&self.prev_hash);
        encoder.write_i32_le(self.height);
        encoder.write_bytes(&self.chainwork);
        encoder.write_u32_le(self.file_number);
        encoder.write_u64_le(self.file_offset);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != ENTRY_LEN {
            return Err(DecodeError::InvalidData("bad block index entry length"));
        }
        let mut decoder = Decoder::new(bytes);
        let entry = Self {
            prev_hash: decoder.read_hash()?,
            height: decoder.read_i32_le()?,
            chainwork: decoder.read_fixed::<32>()?,
            file_number: decoder.read_u32_le()?,
            file_offset: decoder.read_u64_le()?,
        };
        decoder.finish()?;
        Ok(entry)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: i32,
    pub chainwork: [u8; 32],
}

#[derive(Debug)]
pub enum IndexLoadError {
    Store(StoreError),
    Corrupt(String),
    Interrupted,
}

impl std::fmt::Display for IndexLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexLoadError::Store(err) => write!(f, "block index store error: {err}"),
            IndexLoadError::Corrupt(message) => write!(f, "corrupt block index: {message}"),
            IndexLoadError::Interrupted => write!(f, "block index load interrupted by shutdown"),
        }
    }
}

impl std::error::Error for IndexLoadError {}

impl From<StoreError> for IndexLoadError {
    fn from(err: StoreError) -> Self {
        IndexLoadError::Store(err)
    }
}

pub struct ChainIndex<S: ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> ChainIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn get_entry(&self, hash: &Hash256) -> Result<Option<BlockIndexEntry>, StoreError> {
        let bytes = match self.store.get(Column::BlockIndex, hash)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        BlockIndexEntry::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    pub fn put_entry(&self, batch: &mut WriteBatch, hash: &Hash256, entry: &BlockIndexEntry) {
        batch.put(Column::BlockIndex, hash, entry.encode());
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: i32, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), *hash);
    }

    pub fn height_hash(&self, height: i32) -> Result<Option<Hash256>, StoreError> {
        let bytes = match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        bytes
            .as_slice()
            .try_into()
            .map(Some)
            .map_err(|_| StoreError::Backend("bad height index hash length".to_string()))
    }

    /// Read every persisted entry into memory and compute the tip.
    ///
    /// The tip is the entry with the strictly greatest cumulative work;
    /// on equal work the earlier-scanned entry keeps the tip. The scan
    /// runs in ascending key order, so the choice is stable across
    /// restarts of identical on-disk data.
    ///
    /// Checks `interrupt` periodically; a large index can take minutes
    /// to load and shutdown must not wait for it.
    pub fn load(&self, interrupt: &AtomicBool) -> Result<LoadedIndex, IndexLoadError> {
        let mut entries = HashMap::new();
        let mut tip: Option<ChainTip> = None;
        let mut best_work = U256::zero();
        let mut scanned = 0usize;

        for (key, value) in self.store.scan_prefix(Column::BlockIndex, &[])? {
            scanned += 1;
            if scanned % INTERRUPT_CHECK_INTERVAL == 0 && interrupt.load(Ordering::SeqCst) {
                return Err(IndexLoadError::Interrupted);
            }

            let hash: Hash256 = key.as_slice().try_into().map_err(|_| {
                IndexLoadError::Corrupt(format!("bad index key length {}", key.len()))
            })?;
            let entry = BlockIndexEntry::decode(&value).map_err(|err| {
                IndexLoadError::Corrupt(format!("entry {}: {err}", short_hash(&hash)))
            })?;

            let work = entry.chainwork_value();
            if tip.is_none() || work > best_work {
                best_work = work;
                tip = Some(ChainTip {
                    hash,
                    height: entry.height,
                    chainwork: entry.chainwork,
                });
            }
            entries.insert(hash, entry);
        }

        if interrupt.load(Ordering::SeqCst) {
            return Err(IndexLoadError::Interrupted);
        }

        // Every non-genesis entry must link to a known parent.
        for (hash, entry) in &entries {
            if entry.height > 0 && !entries.contains_key(&entry.prev_hash) {
                return Err(IndexLoadError::Corrupt(format!(
                    "entry {} at height {} has unknown parent {}",
                    short_hash(hash),
                    entry.height,
                    short_hash(&entry.prev_hash)
                )));
            }
        }

        onyx_log::log_info!("loaded block index: {} entries", entries.len());
        Ok(LoadedIndex { entries, tip })
    }
}

/// In-memory image of the block index. Entries live in an arena keyed
/// by hash; "parent pointers" are hash lookups into the same map.
#[derive(Debug)]
pub struct LoadedIndex {
    entries: HashMap<Hash256, BlockIndexEntry>,
    tip: Option<ChainTip>,
}

impl LoadedIndex {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            tip: None,
        }
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockIndexEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn parent(&self, entry: &BlockIndexEntry) -> Option<&BlockIndexEntry> {
        self.entries.get(&entry.prev_hash)
    }

    pub fn tip(&self) -> Option<&ChainTip> {
        self.tip.as_ref()
    }

    pub fn tip_height(&self) -> i32 {
        self.tip.as_ref().map(|tip| tip.height).unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &BlockIndexEntry)> {
        self.entries.iter()
    }
}

fn height_key(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

fn short_hash(hash: &Hash256) -> String {
    let mut out = String::with_capacity(16);
    for byte in hash.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
