//! Abstract transactional key-value backend for the cache tables.
//!
//! The cache logic only ever talks to [`KvStore`]: batched point reads,
//! ordered prefix scans, and atomic batch commits over a fixed set of
//! logical tables. Two backends ship: an in-memory store for tests and
//! short-lived sessions, and a persistent store over an embedded database.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use thiserror::Error;

/// Result alias for backend operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors produced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backend rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
    /// The store is held open by another connection.
    #[error("store blocked by another connection: {0}")]
    Blocked(String),
}

/// Logical tables of the cache schema.
///
/// Bump [`crate::cache::SCHEMA_VERSION`] whenever this layout changes; a
/// version mismatch on open drops and recreates every table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Table {
    /// Singleton record: the full known element-type list.
    KnownElementTypes,
    /// Singleton record: the full known link-type list.
    KnownLinkTypes,
    /// Element-type records keyed by type id.
    ElementTypes,
    /// Link-type records keyed by type id.
    LinkTypes,
    /// Property-type records keyed by type id.
    PropertyTypes,
    /// Element records keyed by element id.
    Elements,
    /// Link mirror: edge records keyed by `(source, target)` pair.
    Links,
    /// Endpoint-to-range assignments keyed by endpoint id.
    LinkBlocks,
    /// Range contents keyed by content hash.
    LinkRanges,
    /// Reverse references `(range key, endpoint)` used for scoped GC.
    RangeRefs,
    /// Connected-link statistics keyed by `(element, inexact flag)`.
    ConnectedStats,
    /// Lookup results keyed by the canonical parameter tuple.
    Lookups,
    /// Store metadata, including the schema version.
    Meta,
}

impl Table {
    /// All tables, in schema order.
    pub const ALL: [Table; 13] = [
        Table::KnownElementTypes,
        Table::KnownLinkTypes,
        Table::ElementTypes,
        Table::LinkTypes,
        Table::PropertyTypes,
        Table::Elements,
        Table::Links,
        Table::LinkBlocks,
        Table::LinkRanges,
        Table::RangeRefs,
        Table::ConnectedStats,
        Table::Lookups,
        Table::Meta,
    ];

    /// Stable storage name of the table.
    pub fn name(self) -> &'static str {
        match self {
            Table::KnownElementTypes => "known_element_types",
            Table::KnownLinkTypes => "known_link_types",
            Table::ElementTypes => "element_types",
            Table::LinkTypes => "link_types",
            Table::PropertyTypes => "property_types",
            Table::Elements => "elements",
            Table::Links => "links",
            Table::LinkBlocks => "link_blocks",
            Table::LinkRanges => "link_ranges",
            Table::RangeRefs => "range_refs",
            Table::ConnectedStats => "connected_stats",
            Table::Lookups => "lookups",
            Table::Meta => "meta",
        }
    }

    pub(crate) fn index(self) -> usize {
        Table::ALL
            .iter()
            .position(|t| *t == self)
            .expect("table listed in ALL")
    }
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug)]
pub enum WriteOp {
    /// Insert or replace the value at the key.
    Put(Vec<u8>),
    /// Remove the key if present.
    Delete,
}

/// An ordered set of mutations applied atomically by [`KvStore::commit`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    entries: Vec<(Table, Vec<u8>, WriteOp)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert-or-replace.
    pub fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.entries.push((table, key, WriteOp::Put(value)));
    }

    /// Queues a delete.
    pub fn delete(&mut self, table: Table, key: Vec<u8>) {
        self.entries.push((table, key, WriteOp::Delete));
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued mutations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Queued mutations in application order.
    pub fn entries(&self) -> &[(Table, Vec<u8>, WriteOp)] {
        &self.entries
    }

    /// Consumes the batch, yielding mutations in application order.
    pub fn into_entries(self) -> Vec<(Table, Vec<u8>, WriteOp)> {
        self.entries
    }
}

/// Transactional batch key-value store the cache runs against.
///
/// Implementations must apply [`KvStore::commit`] atomically: either every
/// mutation in the batch lands or none do. Reads started after a commit
/// completes must observe it.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Batched point reads; the result aligns with `keys` by position.
    async fn read(&self, table: Table, keys: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Returns all entries whose key starts with `prefix`, in ascending key
    /// order.
    async fn scan_prefix(&self, table: Table, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Drops every table and recreates it empty.
    async fn clear(&self) -> StoreResult<()>;
}

/// Appends a length-prefixed string component to a composite key.
///
/// The `u32` big-endian prefix keeps components self-delimiting so fixed
/// leading components form a contiguous prefix for scans.
pub(crate) fn put_key_component(dst: &mut Vec<u8>, component: &str) {
    let len = component.len();
    assert!(len <= u32::MAX as usize, "key component too long");
    dst.extend_from_slice(&(len as u32).to_be_bytes());
    dst.extend_from_slice(component.as_bytes());
}

/// Splits a length-prefixed string component, returning it and the bytes
/// consumed.
pub(crate) fn split_key_component(src: &[u8]) -> Option<(&str, usize)> {
    const LEN_LEN: usize = std::mem::size_of::<u32>();
    if src.len() < LEN_LEN {
        return None;
    }
    let mut len_buf = [0u8; LEN_LEN];
    len_buf.copy_from_slice(&src[..LEN_LEN]);
    let len = u32::from_be_bytes(len_buf) as usize;
    let end = LEN_LEN.checked_add(len)?;
    if src.len() < end {
        return None;
    }
    let component = std::str::from_utf8(&src[LEN_LEN..end]).ok()?;
    Some((component, end))
}
