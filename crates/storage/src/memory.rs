//! Ordered in-memory backend, used by tests and `--backend memory`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<(Column, Vec<u8>), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `column` entries starting at `prefix` in ascending key
    /// order, stopping at the first key outside the prefix.
    fn walk_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        mut emit: impl FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let map = self.map.read().expect("memory store lock");
        let start = (column, prefix.to_vec());
        for ((entry_column, key), value) in
            map.range((Bound::Included(start), Bound::Unbounded))
        {
            if *entry_column != column || !key.starts_with(prefix) {
                break;
            }
            emit(key, value)?;
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.map.read().expect("memory store lock");
        Ok(map.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write().expect("memory store lock");
        map.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write().expect("memory store lock");
        map.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let mut out = Vec::new();
        self.walk_prefix(column, prefix, |key, value| {
            out.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(out)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.walk_prefix(column, prefix, |key, value| visitor(key, value))
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut map = self.map.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    map.insert((*column, key.as_slice().to_vec()), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    map.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }

    fn persist(&self, _sync: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn release_logs(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_do_not_alias() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"k", b"meta").expect("put");
        store.put(Column::BlockIndex, b"k", b"index").expect("put");
        assert_eq!(store.get(Column::Meta, b"k").expect("get"), Some(b"meta".to_vec()));
        store.delete(Column::Meta, b"k").expect("delete");
        assert_eq!(store.get(Column::Meta, b"k").expect("get"), None);
        assert_eq!(
            store.get(Column::BlockIndex, b"k").expect("get"),
            Some(b"index".to_vec())
        );
    }

    #[test]
    fn prefix_scan_is_ascending_and_bounded() {
        let store = MemoryStore::new();
        for key in [&b"aa1"[..], b"aa2", b"ab", b"b"] {
            store.put(Column::Meta, key, key).expect("put");
        }
        let hits = store.scan_prefix(Column::Meta, b"aa").expect("scan");
        let keys: Vec<_> = hits.iter().map(|(key, _)| key.as_slice()).collect();
        assert_eq!(keys, vec![&b"aa1"[..], b"aa2"]);
    }

    #[test]
    fn visitor_error_stops_the_walk() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"a", b"1").expect("put");
        store.put(Column::Meta, b"b", b"2").expect("put");
        let mut visited = 0;
        let result = store.for_each_prefix(Column::Meta, b"", &mut |_, _| {
            visited += 1;
            Err(StoreError::Backend("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(visited, 1);
    }

    #[test]
    fn batch_applies_puts_and_deletes() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"gone", b"x").expect("put");
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, &b"kept"[..], &b"v"[..]);
        batch.delete(Column::Meta, &b"gone"[..]);
        store.write_batch(&batch).expect("batch");
        assert_eq!(store.get(Column::Meta, b"kept").expect("get"), Some(b"v".to_vec()));
        assert_eq!(store.get(Column::Meta, b"gone").expect("get"), None);
    }
}
