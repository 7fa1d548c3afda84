//! Persistent [`KvStore`] backend over the redb embedded database.

use std::path::Path;

use async_trait::async_trait;
use redb::{Database, DatabaseError, TableDefinition};
use rustc_hash::FxHashMap;

use super::{KvStore, StoreError, StoreResult, Table, WriteBatch, WriteOp};

fn definition(table: Table) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    TableDefinition::new(table.name())
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Disk-backed store with ACID single-writer transactions.
///
/// All tables are created up front so reads never race table creation. A
/// database file already held open by another process surfaces as
/// [`StoreError::Blocked`].
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens or creates the database at `path` and ensures every table
    /// exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path.as_ref()).map_err(|err| match err {
            DatabaseError::DatabaseAlreadyOpen => {
                StoreError::Blocked(format!("{} is already open", path.as_ref().display()))
            }
            other => backend(other),
        })?;
        let store = Self { db };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(backend)?;
        for table in Table::ALL {
            txn.open_table(definition(table)).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for RedbStore {
    async fn read(&self, table: Table, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(definition(table)).map_err(backend)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = table
                .get(key.as_slice())
                .map_err(backend)?
                .map(|guard| guard.value().to_vec());
            out.push(value);
        }
        Ok(out)
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(definition(table)).map_err(backend)?;
        let mut out = Vec::new();
        for row in table.range(prefix..).map_err(backend)? {
            let (key, value) = row.map_err(backend)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut by_table: FxHashMap<Table, Vec<(Vec<u8>, WriteOp)>> = FxHashMap::default();
        let mut table_order = Vec::new();
        for (table, key, op) in batch.into_entries() {
            if !by_table.contains_key(&table) {
                table_order.push(table);
            }
            by_table.entry(table).or_default().push((key, op));
        }

        let txn = self.db.begin_write().map_err(backend)?;
        for table in table_order {
            let mut handle = txn.open_table(definition(table)).map_err(backend)?;
            for (key, op) in by_table.remove(&table).expect("grouped entries") {
                match op {
                    WriteOp::Put(value) => {
                        handle
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(backend)?;
                    }
                    WriteOp::Delete => {
                        handle.remove(key.as_slice()).map_err(backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(backend)?;
        for table in Table::ALL {
            txn.delete_table(definition(table)).map_err(backend)?;
            txn.open_table(definition(table)).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}
