//! The upstream data-source contract consumed by the cache.
//!
//! Any concrete graph backend (RDF/SPARQL endpoint, REST service, embedded
//! store) implements [`DataProvider`]; the cache only relies on the batch
//! operations below and treats every record payload as opaque data.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::types::{ElementId, ElementTypeId, LinkTypeId, PropertyTypeId, Result};

/// Property bag attached to elements and links.
pub type PropertyMap = BTreeMap<PropertyTypeId, Vec<serde_json::Value>>;

/// A graph element (node) record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    /// Element identifier.
    pub id: ElementId,
    /// Types this element is an instance of.
    pub types: Vec<ElementTypeId>,
    /// Human-readable labels.
    pub label: Vec<String>,
    /// Property values keyed by property type.
    pub properties: PropertyMap,
}

/// An element-type (class) record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementTypeRecord {
    /// Type identifier.
    pub id: ElementTypeId,
    /// Human-readable labels.
    pub label: Vec<String>,
    /// Instance count when the backend exposes one.
    pub instance_count: Option<u64>,
}

/// A link-type record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeRecord {
    /// Type identifier.
    pub id: LinkTypeId,
    /// Human-readable labels.
    pub label: Vec<String>,
}

/// A property-type record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyTypeRecord {
    /// Type identifier.
    pub id: PropertyTypeId,
    /// Human-readable labels.
    pub label: Vec<String>,
}

/// A single edge record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Link type.
    pub link_type: LinkTypeId,
    /// Source endpoint.
    pub source: ElementId,
    /// Target endpoint.
    pub target: ElementId,
    /// Property values keyed by property type.
    pub properties: PropertyMap,
}

/// Per-link-type connection statistics for one element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkCount {
    /// Link type the counts refer to.
    pub link_type: LinkTypeId,
    /// Incoming edge count.
    pub in_count: u64,
    /// Outgoing edge count.
    pub out_count: u64,
    /// Whether the counts are approximate.
    pub inexact: bool,
}

/// Direction constraint for reference-element lookups.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LookupDirection {
    /// Matches elements linked *to* the reference element.
    In,
    /// Matches elements linked *from* the reference element.
    Out,
}

/// Parameters of a free-text / structured element lookup.
///
/// The canonical JSON serialization of this struct (fields in declaration
/// order) doubles as the cache key for lookup results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct LookupParams {
    /// Restrict results to instances of this type.
    pub element_type: Option<ElementTypeId>,
    /// Free-text filter.
    pub text: Option<String>,
    /// Restrict results to elements connected to this one.
    pub ref_element: Option<ElementId>,
    /// Restrict the connection to this link type.
    pub ref_element_link: Option<LinkTypeId>,
    /// Restrict the connection direction.
    pub direction: Option<LookupDirection>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// Batch-oriented upstream graph data source.
///
/// `links` returns every edge with one endpoint in `primary` and the other
/// in `secondary`, in both directions. All operations take a cancellation
/// token and must not cache anything themselves; caching is this crate's
/// job.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// The full set of element types the source knows about.
    async fn known_element_types(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementTypeRecord>>;

    /// The full set of link types the source knows about.
    async fn known_link_types(&self, cancel: &CancellationToken) -> Result<Vec<LinkTypeRecord>>;

    /// Batch point-fetch of element-type records.
    async fn element_types(
        &self,
        ids: &[ElementTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementTypeId, ElementTypeRecord>>;

    /// Batch point-fetch of link-type records.
    async fn link_types(
        &self,
        ids: &[LinkTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<LinkTypeId, LinkTypeRecord>>;

    /// Batch point-fetch of property-type records.
    async fn property_types(
        &self,
        ids: &[PropertyTypeId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<PropertyTypeId, PropertyTypeRecord>>;

    /// Batch point-fetch of element records.
    async fn elements(
        &self,
        ids: &[ElementId],
        cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementId, ElementRecord>>;

    /// All edges between the two endpoint sets, in both directions.
    async fn links(
        &self,
        primary: &[ElementId],
        secondary: &[ElementId],
        cancel: &CancellationToken,
    ) -> Result<Vec<LinkRecord>>;

    /// Connection statistics for a single element.
    async fn connected_link_stats(
        &self,
        element: &ElementId,
        inexact: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<LinkCount>>;

    /// Free-text / structured element search.
    async fn lookup(
        &self,
        params: &LookupParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>>;
}
