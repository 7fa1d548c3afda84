//! The link mirror: the local copy of previously fetched edge records.
//!
//! Records are stored per `(source, target)` pair under an order-preserving
//! composite key, so all pairs of one source form a contiguous key run and
//! the bidirectional read phase is two ordered prefix scans.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::kv::{put_key_component, split_key_component, KvStore, StoreError, StoreResult, Table, WriteBatch};
use crate::provider::LinkRecord;
use crate::types::{ElementId, LinkTypeId};

/// Composite `(source, target)` key for the links table.
pub(crate) fn pair_key(source: &ElementId, target: &ElementId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + source.as_str().len() + target.as_str().len());
    put_key_component(&mut key, source.as_str());
    put_key_component(&mut key, target.as_str());
    key
}

/// Prefix covering every pair of one source.
pub(crate) fn source_prefix(source: &ElementId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + source.as_str().len());
    put_key_component(&mut key, source.as_str());
    key
}

fn decode_pair_key(key: &[u8]) -> StoreResult<(ElementId, ElementId)> {
    let (source, used) = split_key_component(key)
        .ok_or_else(|| StoreError::Backend("link key source truncated".into()))?;
    let (target, _) = split_key_component(&key[used..])
        .ok_or_else(|| StoreError::Backend("link key target truncated".into()))?;
    Ok((ElementId::from(source), ElementId::from(target)))
}

/// Mirror store handle.
pub(crate) struct LinkMirror {
    kv: Arc<dyn KvStore>,
}

impl LinkMirror {
    pub(crate) fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Appends fetched records, deduplicating against what each pair
    /// already holds, and commits the whole append atomically.
    pub(crate) async fn append(&self, records: &[LinkRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut by_pair: FxHashMap<Vec<u8>, Vec<&LinkRecord>> = FxHashMap::default();
        for record in records {
            by_pair
                .entry(pair_key(&record.source, &record.target))
                .or_default()
                .push(record);
        }

        let keys: Vec<Vec<u8>> = by_pair.keys().cloned().collect();
        let existing = self.kv.read(Table::Links, &keys).await?;

        let mut batch = WriteBatch::new();
        for (key, stored) in keys.into_iter().zip(existing) {
            let mut merged: Vec<LinkRecord> = match stored {
                Some(bytes) => serde_json::from_slice(&bytes)
                    .map_err(|err| StoreError::Backend(format!("link decode: {err}")))?,
                None => Vec::new(),
            };
            let mut changed = false;
            for record in by_pair.remove(&key).expect("pair grouped") {
                if !merged.contains(record) {
                    merged.push(record.clone());
                    changed = true;
                }
            }
            if changed {
                let encoded = serde_json::to_vec(&merged)
                    .map_err(|err| StoreError::Backend(format!("link encode: {err}")))?;
                batch.put(Table::Links, key, encoded);
            }
        }
        self.kv.commit(batch).await
    }

    /// Assembles the bidirectional result set for `primary × secondary`.
    ///
    /// One forward ordered scan per primary source plus one reverse scan
    /// per secondary source; the reverse scan skips records the forward
    /// criteria already produced, so no edge is reported twice.
    pub(crate) async fn read_links(
        &self,
        primary: &[ElementId],
        secondary: &[ElementId],
        link_types: Option<&[LinkTypeId]>,
    ) -> StoreResult<Vec<LinkRecord>> {
        let primary_set: FxHashSet<&ElementId> = primary.iter().collect();
        let secondary_set: FxHashSet<&ElementId> = secondary.iter().collect();
        let type_filter: Option<FxHashSet<&LinkTypeId>> =
            link_types.map(|types| types.iter().collect());

        let mut out = Vec::new();
        for source in primary {
            self.scan_side(source, &secondary_set, None, &type_filter, &mut out)
                .await?;
        }
        for source in secondary {
            self.scan_side(
                source,
                &primary_set,
                Some((&primary_set, &secondary_set)),
                &type_filter,
                &mut out,
            )
            .await?;
        }
        Ok(out)
    }

    async fn scan_side(
        &self,
        source: &ElementId,
        wanted_targets: &FxHashSet<&ElementId>,
        skip_forward: Option<(&FxHashSet<&ElementId>, &FxHashSet<&ElementId>)>,
        type_filter: &Option<FxHashSet<&LinkTypeId>>,
        out: &mut Vec<LinkRecord>,
    ) -> StoreResult<()> {
        let rows = self
            .kv
            .scan_prefix(Table::Links, &source_prefix(source))
            .await?;
        for (key, value) in rows {
            let (stored_source, stored_target) = decode_pair_key(&key)?;
            if !wanted_targets.contains(&stored_target) {
                continue;
            }
            if let Some((primary_set, secondary_set)) = skip_forward {
                // Already produced by the forward pass.
                if primary_set.contains(&stored_source) && secondary_set.contains(&stored_target) {
                    continue;
                }
            }
            let records: Vec<LinkRecord> = serde_json::from_slice(&value)
                .map_err(|err| StoreError::Backend(format!("link decode: {err}")))?;
            for record in records {
                if let Some(filter) = type_filter {
                    if !filter.contains(&record.link_type) {
                        continue;
                    }
                }
                out.push(record);
            }
        }
        Ok(())
    }
}
