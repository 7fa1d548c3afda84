//! Content-addressed storage of adjacency ranges.
//!
//! Every endpoint maps to at most one [`RangeKey`]; the key is a pure
//! function of the range's members, so structurally equal ranges share one
//! stored copy. Assignments only ever move to strictly larger ranges, and
//! keys left without referents are garbage-collected by the same commit
//! that orphaned them.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::blocks::AdjacencyRange;
use crate::digest::Sha256;
use crate::kv::{KvStore, StoreError, StoreResult, Table, WriteBatch};
use crate::types::{ElementId, RangeKey};

/// Derives the content-addressed key of a range.
///
/// Each member is hashed independently and the per-member digests are
/// chain-hashed in sorted member order, so the key is invariant under input
/// permutation and duplication. The empty range hashes to the SHA-256
/// empty-string digest.
pub fn range_key_of(range: &AdjacencyRange) -> RangeKey {
    let mut outer = Sha256::new();
    let mut member_hasher = Sha256::new();
    for member in range.iter() {
        member_hasher.start();
        member_hasher.update(member.as_str().as_bytes());
        outer.update(&member_hasher.digest());
    }
    RangeKey(outer.digest_hex())
}

/// One endpoint assignment change inside a range-store commit.
#[derive(Clone, Debug)]
pub struct AssignmentUpdate {
    /// Endpoint being reassigned.
    pub endpoint: ElementId,
    /// Key the endpoint pointed at before, if any.
    pub previous: Option<RangeKey>,
    /// Key the endpoint points at after the commit.
    pub next: RangeKey,
}

/// Store of endpoint→key assignments and key→members range contents.
pub struct RangeStore {
    kv: Arc<dyn KvStore>,
}

impl RangeStore {
    /// Creates a store over the backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Batched lookup of current assignments for `endpoints`.
    pub async fn assignments_for(
        &self,
        endpoints: &[ElementId],
    ) -> StoreResult<FxHashMap<ElementId, RangeKey>> {
        let keys: Vec<Vec<u8>> = endpoints
            .iter()
            .map(|e| e.as_str().as_bytes().to_vec())
            .collect();
        let values = self.kv.read(Table::LinkBlocks, &keys).await?;
        let mut out = FxHashMap::default();
        for (endpoint, value) in endpoints.iter().zip(values) {
            if let Some(bytes) = value {
                let key = String::from_utf8(bytes)
                    .map_err(|_| StoreError::Backend("range key is not UTF-8".into()))?;
                out.insert(endpoint.clone(), RangeKey(key));
            }
        }
        Ok(out)
    }

    /// Batched lookup of range contents; unknown keys are simply absent
    /// from the result.
    pub async fn resolve(
        &self,
        keys: &[RangeKey],
    ) -> StoreResult<FxHashMap<RangeKey, AdjacencyRange>> {
        let raw: Vec<Vec<u8>> = keys
            .iter()
            .map(|k| k.as_str().as_bytes().to_vec())
            .collect();
        let values = self.kv.read(Table::LinkRanges, &raw).await?;
        let mut out = FxHashMap::default();
        for (key, value) in keys.iter().zip(values) {
            if let Some(bytes) = value {
                let members: Vec<ElementId> = serde_json::from_slice(&bytes)
                    .map_err(|err| StoreError::Backend(format!("range decode: {err}")))?;
                out.insert(key.clone(), AdjacencyRange::new(members));
            }
        }
        Ok(out)
    }

    /// Atomically writes assignment changes and newly introduced range
    /// contents, then deletes any replaced key that the commit left without
    /// referents.
    ///
    /// Garbage collection is scoped to keys touched by this commit: the
    /// reverse-reference table is consulted only for `previous` keys, and
    /// the in-batch reference changes are replayed over that snapshot
    /// before deciding a deletion, so the whole decision rides in one
    /// atomic batch.
    pub async fn commit(
        &self,
        updates: &[AssignmentUpdate],
        new_ranges: &FxHashMap<RangeKey, AdjacencyRange>,
    ) -> StoreResult<()> {
        if updates.is_empty() && new_ranges.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for (key, range) in new_ranges {
            let members: Vec<&ElementId> = range.iter().collect();
            let encoded = serde_json::to_vec(&members)
                .map_err(|err| StoreError::Backend(format!("range encode: {err}")))?;
            batch.put(Table::LinkRanges, key.as_str().as_bytes().to_vec(), encoded);
        }

        let mut replaced: FxHashSet<&RangeKey> = FxHashSet::default();
        for update in updates {
            batch.put(
                Table::LinkBlocks,
                update.endpoint.as_str().as_bytes().to_vec(),
                update.next.as_str().as_bytes().to_vec(),
            );
            batch.put(
                Table::RangeRefs,
                ref_key(&update.next, &update.endpoint),
                Vec::new(),
            );
            if let Some(previous) = &update.previous {
                if *previous != update.next {
                    batch.delete(Table::RangeRefs, ref_key(previous, &update.endpoint));
                    replaced.insert(previous);
                }
            }
        }

        // Replay this commit's reference changes over the stored reverse
        // references to find keys that end up unreferenced.
        for old_key in replaced {
            let prefix = old_key.as_str().as_bytes().to_vec();
            let stored = self.kv.scan_prefix(Table::RangeRefs, &prefix).await?;
            let mut referents: FxHashSet<Vec<u8>> =
                stored.into_iter().map(|(key, _)| key).collect();
            for update in updates {
                if update.previous.as_ref() == Some(old_key) && update.next != *old_key {
                    referents.remove(&ref_key(old_key, &update.endpoint));
                }
                if update.next == *old_key {
                    referents.insert(ref_key(old_key, &update.endpoint));
                }
            }
            if referents.is_empty() {
                trace!(range_key = %old_key, "ranges.gc.unreferenced");
                batch.delete(Table::LinkRanges, old_key.as_str().as_bytes().to_vec());
            }
        }

        self.kv.commit(batch).await
    }
}

fn ref_key(key: &RangeKey, endpoint: &ElementId) -> Vec<u8> {
    // Range keys are fixed-width hex, so the key itself is a scan prefix.
    let mut out = Vec::with_capacity(key.as_str().len() + endpoint.as_str().len());
    out.extend_from_slice(key.as_str().as_bytes());
    out.extend_from_slice(endpoint.as_str().as_bytes());
    out
}
