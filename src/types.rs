//! Identifier newtypes, the crate error taxonomy, and the `Result` alias.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Opaque identifier of a graph element endpoint.
///
/// No semantic meaning is assumed beyond equality and lexicographic total
/// ordering, which the link mirror relies on for its range scans.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

/// Identifier of an element type (class) record.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementTypeId(pub String);

/// Identifier of a link type record.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkTypeId(pub String);

/// Identifier of a property type record.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyTypeId(pub String);

/// Hex-encoded SHA-256 key deterministically derived from the sorted members
/// of an adjacency range. Equal member sets always yield equal keys.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeKey(pub String);

macro_rules! impl_id_common {
    ($ty:ident) => {
        impl $ty {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty(value.to_owned())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                $ty(value)
            }
        }
    };
}

impl_id_common!(ElementId);
impl_id_common!(ElementTypeId);
impl_id_common!(LinkTypeId);
impl_id_common!(PropertyTypeId);
impl_id_common!(RangeKey);

/// Step of the link-fetch path during which a storage failure occurred.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Resolving current endpoint-to-range assignments.
    ReadRanges,
    /// Fetching residual blocks and persisting them to the link mirror.
    FetchAndCache,
    /// Committing recomputed range assignments.
    UpdateRanges,
    /// Assembling the result set from the link mirror.
    ReadMirror,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ReadRanges => "read-ranges",
            Phase::FetchAndCache => "fetch-and-cache",
            Phase::UpdateRanges => "update-ranges",
            Phase::ReadMirror => "read-mirror",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The wrapped upstream provider rejected a request. Never retried
    /// internally; no partial cache mutation is performed for the failed
    /// sub-fetch.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The persistent store rejected a read or write.
    #[error("storage transaction failed during {phase}: {source}")]
    Storage {
        /// Which step of the link-fetch path failed.
        phase: Phase,
        /// The backend error that aborted the transaction.
        #[source]
        source: StoreError,
    },
    /// The store is held open by another connection, blocking schema access.
    /// Usually resolvable by the caller, unlike a data problem.
    #[error("cache store blocked by another connection: {0}")]
    SchemaBlocked(String),
    /// The operation observed its cancellation signal at a suspension point.
    #[error("operation cancelled")]
    Cancelled,
    /// Caller supplied an argument the cache cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Persisted state failed to decode.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl CacheError {
    /// Wraps an arbitrary upstream failure.
    pub fn upstream<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Upstream(Box::new(source))
    }

    /// Wraps a backend failure with the phase it interrupted. A blocked
    /// store surfaces as [`CacheError::SchemaBlocked`] regardless of phase.
    pub fn storage(phase: Phase, source: StoreError) -> Self {
        match source {
            StoreError::Blocked(detail) => CacheError::SchemaBlocked(detail),
            other => CacheError::Storage {
                phase,
                source: other,
            },
        }
    }
}
