//! In-memory [`KvStore`] backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KvStore, StoreResult, Table, WriteBatch, WriteOp};

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Volatile backend holding every table in ordered in-memory maps.
///
/// Commits swap data under a single mutex, so batches are atomic and reads
/// started after a commit observe it. Mainly used by tests and short-lived
/// sessions that do not want an on-disk cache.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Vec<TableMap>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(
                Table::ALL.iter().map(|_| TableMap::new()).collect(),
            )),
        }
    }

    /// Number of entries currently held by `table`.
    pub fn table_len(&self, table: Table) -> usize {
        self.tables.lock()[table.index()].len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn read(&self, table: Table, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let tables = self.tables.lock();
        let map = &tables[table.index()];
        Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.lock();
        let map = &tables[table.index()];
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        for (table, key, op) in batch.into_entries() {
            let map = &mut tables[table.index()];
            match op {
                WriteOp::Put(value) => {
                    map.insert(key, value);
                }
                WriteOp::Delete => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        for map in tables.iter_mut() {
            map.clear();
        }
        Ok(())
    }
}
