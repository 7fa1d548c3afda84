//! Umbra: a content-addressed adjacency range cache for graph data providers.
//!
//! Wraps an upstream [`provider::DataProvider`] and maintains a transactional
//! index of which source×target regions of the link space have already been
//! fetched, so repeat queries only touch the upstream for genuinely new
//! sub-regions. Fetched regions are tracked as content-addressed ranges keyed
//! by a streaming SHA-256 digest of their sorted members.

#![warn(missing_docs)]

pub mod blocks;
pub mod cache;
pub mod cancel;
pub mod chunking;
pub mod digest;
pub mod kv;
pub mod provider;
pub mod ranges;
pub mod types;

/// Cache orchestration entry point.
pub use cache::{CacheOptions, CachedProvider};

/// Cooperative cancellation signal passed through every async operation.
pub use cancel::CancellationToken;

/// Crate-wide result and error types.
pub use types::{CacheError, Phase, RangeKey, Result};
