//! Cache observability hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking cache effectiveness.
///
/// Implementations receive a callback per cached operation; the cache never
/// inspects the results, so recording can be as cheap or as rich as the
/// embedder wants.
pub trait CacheMetrics: Send + Sync {
    /// Records a batched point lookup: how many keys were served locally
    /// and how many had to be fetched upstream.
    ///
    /// `kind` names the record family ("elements", "element-types", ...).
    fn point_lookup(&self, kind: &'static str, hits: usize, misses: usize);

    /// Records one link request entering the update path.
    fn link_request(&self);

    /// Records residual sub-blocks fetched upstream for one link request.
    fn link_residual_fetched(&self, blocks: usize);

    /// Records a link request fully answered from the local mirror.
    fn link_request_covered(&self);

    /// Records a lookup query and whether it was served from cache.
    fn lookup_query(&self, cached: bool);
}

/// A no-op implementation of [`CacheMetrics`] discarding everything.
#[derive(Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn point_lookup(&self, _kind: &'static str, _hits: usize, _misses: usize) {}
    fn link_request(&self) {}
    fn link_residual_fetched(&self, _blocks: usize) {}
    fn link_request_covered(&self) {}
    fn lookup_query(&self, _cached: bool) {}
}

/// A thread-safe counter-based implementation of [`CacheMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Point-lookup keys served from cache.
    pub point_hits: AtomicU64,
    /// Point-lookup keys fetched upstream.
    pub point_misses: AtomicU64,
    /// Link requests entering the update path.
    pub link_requests: AtomicU64,
    /// Residual sub-blocks fetched upstream.
    pub link_residuals: AtomicU64,
    /// Link requests answered without any upstream fetch.
    pub link_covered: AtomicU64,
    /// Lookup queries served from cache.
    pub lookup_hits: AtomicU64,
    /// Lookup queries forwarded upstream.
    pub lookup_misses: AtomicU64,
}

impl CacheMetrics for CounterMetrics {
    fn point_lookup(&self, _kind: &'static str, hits: usize, misses: usize) {
        self.point_hits.fetch_add(hits as u64, Ordering::Relaxed);
        self.point_misses.fetch_add(misses as u64, Ordering::Relaxed);
    }

    fn link_request(&self) {
        self.link_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn link_residual_fetched(&self, blocks: usize) {
        self.link_residuals
            .fetch_add(blocks as u64, Ordering::Relaxed);
    }

    fn link_request_covered(&self) {
        self.link_covered.fetch_add(1, Ordering::Relaxed);
    }

    fn lookup_query(&self, cached: bool) {
        if cached {
            self.lookup_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn CacheMetrics> {
    Arc::new(NoopMetrics)
}
