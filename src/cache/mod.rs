//! Cache orchestration: the caching wrapper around an upstream provider.
//!
//! Point lookups (elements, type records, stats, lookups) are cached per
//! key with optional explicit negative markers. Link fetches go through the
//! serialized range-update path: resolve which endpoints already carry a
//! known range, subtract the covered region from the request, fetch only
//! the residual blocks, then commit grown, re-hashed ranges. Results are
//! always assembled from the local link mirror afterwards.

mod metrics;
mod mirror;

pub use metrics::{default_metrics, CacheMetrics, CounterMetrics, NoopMetrics};

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::blocks::{subtract_blocks, AdjacencyBlock, AdjacencyRange};
use crate::cancel::CancellationToken;
use crate::chunking::{chunk_cross_product, CrossChunk};
use crate::kv::{KvStore, Table, WriteBatch};
use crate::provider::{
    DataProvider, ElementRecord, ElementTypeRecord, LinkCount, LinkRecord, LinkTypeRecord,
    LookupParams, PropertyTypeRecord,
};
use crate::ranges::{range_key_of, AssignmentUpdate, RangeStore};
use crate::types::{
    CacheError, ElementId, ElementTypeId, LinkTypeId, Phase, PropertyTypeId, RangeKey, Result,
};

use mirror::LinkMirror;

/// Version of the logical table layout. Bumping it invalidates every
/// existing cache store on open (full drop, not migration).
pub const SCHEMA_VERSION: u32 = 1;

/// Default combined measure budget for one upstream link request.
pub const DEFAULT_LINK_REQUEST_BUDGET: usize = 4096;

const META_SCHEMA_KEY: &[u8] = b"schema_version";
const SINGLETON_KEY: &[u8] = b"all";

const TAG_ABSENT: u8 = 0;
const TAG_PRESENT: u8 = 1;

/// Configuration options supplied when opening a [`CachedProvider`].
#[derive(Clone)]
pub struct CacheOptions {
    /// The key-value backend holding the cache tables.
    pub store: Arc<dyn KvStore>,
    /// Whether to record explicit negative markers for keys the upstream
    /// confirmed absent, suppressing repeat fetches for them.
    pub cache_absent: bool,
    /// Whether to cache lookup results by their full parameter tuple.
    pub cache_lookups: bool,
    /// Combined measure budget for one upstream link request; larger
    /// requests are split by the chunker.
    pub link_request_budget: usize,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn CacheMetrics>>,
}

impl CacheOptions {
    /// Creates options with default settings over the given backend.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            cache_absent: true,
            cache_lookups: true,
            link_request_budget: DEFAULT_LINK_REQUEST_BUDGET,
            metrics: None,
        }
    }

    /// Enables or disables negative markers.
    pub fn cache_absent(mut self, enabled: bool) -> Self {
        self.cache_absent = enabled;
        self
    }

    /// Enables or disables lookup-result caching.
    pub fn cache_lookups(mut self, enabled: bool) -> Self {
        self.cache_lookups = enabled;
        self
    }

    /// Sets the link request budget.
    pub fn link_request_budget(mut self, budget: usize) -> Self {
        self.link_request_budget = budget;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Caching wrapper around an upstream [`DataProvider`].
///
/// All state lives in the injected store; the wrapper itself only holds the
/// connection handle and the exclusive lock serializing link-range updates
/// process-wide. Dropping the wrapper releases the store handle.
pub struct CachedProvider<P> {
    upstream: P,
    kv: Arc<dyn KvStore>,
    ranges: RangeStore,
    mirror: LinkMirror,
    metrics: Arc<dyn CacheMetrics>,
    cache_absent: bool,
    cache_lookups: bool,
    link_request_budget: usize,
    link_guard: Mutex<()>,
}

impl<P: DataProvider> CachedProvider<P> {
    /// Opens the cache over `upstream`, validating the stored schema
    /// version. A mismatch drops and recreates every table.
    pub async fn open(upstream: P, options: CacheOptions) -> Result<Self> {
        let kv = Arc::clone(&options.store);
        let provider = Self {
            upstream,
            ranges: RangeStore::new(Arc::clone(&kv)),
            mirror: LinkMirror::new(Arc::clone(&kv)),
            metrics: options.metrics.unwrap_or_else(default_metrics),
            cache_absent: options.cache_absent,
            cache_lookups: options.cache_lookups,
            link_request_budget: options.link_request_budget.max(1),
            link_guard: Mutex::new(()),
            kv,
        };
        provider.ensure_schema().await?;
        Ok(provider)
    }

    /// The wrapped upstream provider.
    pub fn upstream(&self) -> &P {
        &self.upstream
    }

    /// Drops every cached table and re-stamps the schema version.
    ///
    /// Safe to call with operations in flight: they either complete against
    /// the old contents or re-populate the fresh store.
    pub async fn clear_cache(&self) -> Result<()> {
        self.kv
            .clear()
            .await
            .map_err(|err| CacheError::storage(Phase::UpdateRanges, err))?;
        self.write_schema_version().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        let stored = self
            .kv
            .read(Table::Meta, &[META_SCHEMA_KEY.to_vec()])
            .await
            .map_err(|err| CacheError::storage(Phase::ReadRanges, err))?;
        let current = SCHEMA_VERSION.to_be_bytes().to_vec();
        match stored.into_iter().next().flatten() {
            Some(bytes) if bytes == current => Ok(()),
            stored => {
                info!(
                    found = ?stored.map(|b| b.len()),
                    version = SCHEMA_VERSION,
                    "cache.schema.reset"
                );
                self.kv
                    .clear()
                    .await
                    .map_err(|err| CacheError::storage(Phase::UpdateRanges, err))?;
                self.write_schema_version().await
            }
        }
    }

    async fn write_schema_version(&self) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(
            Table::Meta,
            META_SCHEMA_KEY.to_vec(),
            SCHEMA_VERSION.to_be_bytes().to_vec(),
        );
        self.kv
            .commit(batch)
            .await
            .map_err(|err| CacheError::storage(Phase::UpdateRanges, err))
    }

    /// Fetches links between the two sets, optionally filtered by link
    /// type, fetching only sub-regions the cache has not seen before.
    pub async fn links_filtered(
        &self,
        primary: &[ElementId],
        secondary: &[ElementId],
        link_types: Option<&[LinkTypeId]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LinkRecord>> {
        let primary = normalize(primary);
        let secondary = normalize(secondary);
        if primary.is_empty() || secondary.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = chunk_cross_product(
            &primary,
            &secondary,
            |id| id.as_str().len().max(1),
            self.link_request_budget,
        );
        for chunk in &chunks {
            self.update_link_ranges(chunk, cancel).await?;
        }

        // The mirror read is a separate transaction: a failure here no
        // longer rolls back the committed range update.
        cancel.check()?;
        self.mirror
            .read_links(&primary, &secondary, link_types)
            .await
            .map_err(|err| CacheError::storage(Phase::ReadMirror, err))
    }

    /// The mutating half of the link path for one chunk: resolve ranges,
    /// subtract, fetch residuals, recompute and commit grown ranges.
    /// Serialized process-wide behind the link guard.
    async fn update_link_ranges(&self, chunk: &CrossChunk, cancel: &CancellationToken) -> Result<()> {
        let sources = normalize(&chunk.sources);
        let targets = normalize(&chunk.targets);
        if sources.is_empty() || targets.is_empty() {
            return Ok(());
        }

        cancel.check()?;
        self.metrics.link_request();
        let _guard = self.link_guard.lock().await;
        cancel.check()?;

        let mut endpoints = sources.clone();
        endpoints.extend(targets.iter().cloned());
        endpoints.sort();
        endpoints.dedup();

        let assignments = self
            .ranges
            .assignments_for(&endpoints)
            .await
            .map_err(|err| CacheError::storage(Phase::ReadRanges, err))?;
        let mut distinct_keys: Vec<_> = assignments.values().cloned().collect();
        distinct_keys.sort();
        distinct_keys.dedup();
        let resolved = self
            .ranges
            .resolve(&distinct_keys)
            .await
            .map_err(|err| CacheError::storage(Phase::ReadRanges, err))?;

        // Requested sources grouped by their current range form the
        // covering blocks for the subtraction.
        let mut group_order = Vec::new();
        let mut groups: FxHashMap<&RangeKey, Vec<ElementId>> = FxHashMap::default();
        for source in &sources {
            if let Some(key) = assignments.get(source) {
                if resolved.contains_key(key) {
                    if !groups.contains_key(key) {
                        group_order.push(key);
                    }
                    groups.entry(key).or_default().push(source.clone());
                }
            }
        }
        let covering: Vec<AdjacencyBlock> = group_order
            .into_iter()
            .map(|key| {
                let members = groups.remove(key).expect("grouped source");
                AdjacencyBlock::new(
                    AdjacencyRange::from_sorted(members),
                    resolved[key].clone(),
                )
            })
            .collect();

        let base = AdjacencyBlock::new(
            AdjacencyRange::from_sorted(sources),
            AdjacencyRange::from_sorted(targets),
        );
        let missing = subtract_blocks(&base, &covering);
        debug!(
            requested_pairs = base.pair_count(),
            covering = covering.len(),
            missing = missing.len(),
            "cache.links.residual"
        );

        if missing.is_empty() {
            self.metrics.link_request_covered();
        } else {
            self.metrics.link_residual_fetched(missing.len());
        }
        for block in &missing {
            cancel.check()?;
            let fetched = self
                .upstream
                .links(block.sources.as_slice(), block.targets.as_slice(), cancel)
                .await?;
            cancel.check()?;
            self.mirror
                .append(&fetched)
                .await
                .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        }

        // Recompute assignments: endpoints on both sides grow to the full
        // superset, one-sided endpoints grow by the opposite side. A range
        // is only re-hashed when its member count strictly grows.
        let superset = base.sources.union(&base.targets);
        let mut updates = Vec::new();
        let mut new_ranges: FxHashMap<RangeKey, AdjacencyRange> = FxHashMap::default();
        for endpoint in &endpoints {
            let in_sources = base.sources.contains(endpoint);
            let in_targets = base.targets.contains(endpoint);
            let additions = if in_sources && in_targets {
                &superset
            } else if in_sources {
                &base.targets
            } else {
                &base.sources
            };
            let previous_key = assignments.get(endpoint);
            let previous_range = previous_key.and_then(|key| resolved.get(key));
            let next_range = match previous_range {
                Some(range) => range.union(additions),
                None => additions.clone(),
            };
            let previous_len = previous_range.map_or(0, AdjacencyRange::len);
            if next_range.len() > previous_len {
                let key = range_key_of(&next_range);
                updates.push(AssignmentUpdate {
                    endpoint: endpoint.clone(),
                    previous: previous_key.cloned(),
                    next: key.clone(),
                });
                new_ranges.entry(key).or_insert(next_range);
            }
        }

        if !updates.is_empty() {
            cancel.check()?;
            self.ranges
                .commit(&updates, &new_ranges)
                .await
                .map_err(|err| CacheError::storage(Phase::UpdateRanges, err))?;
        }
        Ok(())
    }

    /// Shared flow for the four point-lookup record families: partition
    /// into cached and missing, fetch only the missing keys upstream in one
    /// batch, persist results (and negative markers when enabled), merge.
    async fn cached_points<K, V, F, Fut>(
        &self,
        table: Table,
        kind: &'static str,
        ids: &[K],
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<FxHashMap<K, V>>
    where
        K: Clone + Eq + Hash + AsRef<str>,
        V: Serialize + DeserializeOwned,
        F: FnOnce(Vec<K>) -> Fut,
        Fut: std::future::Future<Output = Result<FxHashMap<K, V>>>,
    {
        cancel.check()?;
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| id.as_ref().as_bytes().to_vec()).collect();
        let stored = self
            .kv
            .read(table, &keys)
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;

        let mut result = FxHashMap::default();
        let mut missing = Vec::new();
        let mut missing_seen = FxHashSet::default();
        for (id, value) in ids.iter().zip(stored) {
            match value {
                Some(bytes) => {
                    if let Some(record) = decode_cached::<V>(&bytes)? {
                        result.insert(id.clone(), record);
                    }
                    // An absent marker is a confirmed upstream miss; do not
                    // ask again.
                }
                None => {
                    if missing_seen.insert(id.clone()) {
                        missing.push(id.clone());
                    }
                }
            }
        }

        if missing.is_empty() {
            self.metrics.point_lookup(kind, ids.len(), 0);
            return Ok(result);
        }
        self.metrics
            .point_lookup(kind, ids.len() - missing.len(), missing.len());
        debug!(kind, missing = missing.len(), "cache.points.fetch");

        cancel.check()?;
        let fetched = fetch(missing.clone()).await?;
        cancel.check()?;

        let mut batch = WriteBatch::new();
        for id in &missing {
            let key = id.as_ref().as_bytes().to_vec();
            match fetched.get(id) {
                Some(record) => batch.put(table, key, encode_present(record)?),
                None if self.cache_absent => batch.put(table, key, vec![TAG_ABSENT]),
                None => {}
            }
        }
        if !batch.is_empty() {
            self.kv
                .commit(batch)
                .await
                .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        }
        result.extend(fetched);
        Ok(result)
    }

    /// Shared flow for the singleton known-type sets.
    async fn cached_singleton<V, F, Fut>(
        &self,
        table: Table,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        cancel.check()?;
        let stored = self
            .kv
            .read(table, &[SINGLETON_KEY.to_vec()])
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        if let Some(bytes) = stored.into_iter().next().flatten() {
            if let Some(value) = decode_cached::<V>(&bytes)? {
                return Ok(value);
            }
        }

        cancel.check()?;
        let value = fetch().await?;
        cancel.check()?;
        let mut batch = WriteBatch::new();
        batch.put(table, SINGLETON_KEY.to_vec(), encode_present(&value)?);
        self.kv
            .commit(batch)
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        Ok(value)
    }
}

#[async_trait]
impl<P: DataProvider> DataProvider for CachedProvider<P> {
    async fn known_element_types(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementTypeRecord>> {
        self.cached_singleton(Table::KnownElementTypes, cancel, || {
            self.upstream.known_element_types(cancel)
        })
        .await
    }

    async fn known_link_types(&self, cancel: &CancellationToken) -> Result<Vec<LinkTypeRecord>> {
        self.cached_singleton(Table::KnownLinkTypes, cancel, || {
            self.upstream.known_link_types(cancel)
        })
        .await
    }

    async fn element_types(
        &self,
        ids: &[ElementTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementTypeId, ElementTypeRecord>> {
        self.cached_points(Table::ElementTypes, "element-types", ids, cancel, |missing| async move {
            self.upstream.element_types(&missing, cancel).await
        })
        .await
    }

    async fn link_types(
        &self,
        ids: &[LinkTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<LinkTypeId, LinkTypeRecord>> {
        self.cached_points(Table::LinkTypes, "link-types", ids, cancel, |missing| async move {
            self.upstream.link_types(&missing, cancel).await
        })
        .await
    }

    async fn property_types(
        &self,
        ids: &[PropertyTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<PropertyTypeId, PropertyTypeRecord>> {
        self.cached_points(
            Table::PropertyTypes,
            "property-types",
            ids,
            cancel,
            |missing| async move { self.upstream.property_types(&missing, cancel).await },
        )
        .await
    }

    async fn elements(
        &self,
        ids: &[ElementId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementId, ElementRecord>> {
        self.cached_points(Table::Elements, "elements", ids, cancel, |missing| async move {
            self.upstream.elements(&missing, cancel).await
        })
        .await
    }

    async fn links(
        &self,
        primary: &[ElementId],
        secondary: &[ElementId],
        cancel: &CancellationToken,
    ) -> Result<Vec<LinkRecord>> {
        self.links_filtered(primary, secondary, None, cancel).await
    }

    async fn connected_link_stats(
        &self,
        element: &ElementId,
        inexact: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<LinkCount>> {
        cancel.check()?;
        let key = stats_key(element, inexact);
        let stored = self
            .kv
            .read(Table::ConnectedStats, &[key.clone()])
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        if let Some(bytes) = stored.into_iter().next().flatten() {
            if let Some(stats) = decode_cached::<Vec<LinkCount>>(&bytes)? {
                return Ok(stats);
            }
        }

        cancel.check()?;
        let stats = self
            .upstream
            .connected_link_stats(element, inexact, cancel)
            .await?;
        cancel.check()?;
        let mut batch = WriteBatch::new();
        batch.put(Table::ConnectedStats, key, encode_present(&stats)?);
        self.kv
            .commit(batch)
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        Ok(stats)
    }

    async fn lookup(
        &self,
        params: &LookupParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        if !self.cache_lookups {
            self.metrics.lookup_query(false);
            return self.upstream.lookup(params, cancel).await;
        }

        cancel.check()?;
        let key = serde_json::to_vec(params)
            .map_err(|err| CacheError::Corruption(format!("lookup key encode: {err}")))?;
        let stored = self
            .kv
            .read(Table::Lookups, &[key.clone()])
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        if let Some(bytes) = stored.into_iter().next().flatten() {
            if let Some(items) = decode_cached::<Vec<ElementRecord>>(&bytes)? {
                self.metrics.lookup_query(true);
                return Ok(items);
            }
        }
        self.metrics.lookup_query(false);

        cancel.check()?;
        let items = self.upstream.lookup(params, cancel).await?;
        cancel.check()?;
        let mut batch = WriteBatch::new();
        batch.put(Table::Lookups, key, encode_present(&items)?);
        self.kv
            .commit(batch)
            .await
            .map_err(|err| CacheError::storage(Phase::FetchAndCache, err))?;
        Ok(items)
    }
}

fn normalize(ids: &[ElementId]) -> Vec<ElementId> {
    let mut out = ids.to_vec();
    out.sort();
    out.dedup();
    out
}

fn stats_key(element: &ElementId, inexact: bool) -> Vec<u8> {
    let mut key = Vec::with_capacity(element.as_str().len() + 5);
    crate::kv::put_key_component(&mut key, element.as_str());
    key.push(u8::from(inexact));
    key
}

fn encode_present<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    let mut out = vec![TAG_PRESENT];
    serde_json::to_writer(&mut out, value)
        .map_err(|err| CacheError::Corruption(format!("cache encode: {err}")))?;
    Ok(out)
}

fn decode_cached<V: DeserializeOwned>(bytes: &[u8]) -> Result<Option<V>> {
    match bytes.first() {
        Some(&TAG_ABSENT) => Ok(None),
        Some(&TAG_PRESENT) => serde_json::from_slice(&bytes[1..])
            .map(Some)
            .map_err(|err| CacheError::Corruption(format!("cache decode: {err}"))),
        _ => Err(CacheError::Corruption(
            "cached value carries unknown tag".into(),
        )),
    }
}
