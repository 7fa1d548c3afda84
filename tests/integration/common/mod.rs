//! Shared fixtures: an in-memory upstream provider with call-count spies.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use umbra::cancel::CancellationToken;
use umbra::provider::{
    DataProvider, ElementRecord, ElementTypeRecord, LinkCount, LinkRecord, LinkTypeRecord,
    LookupParams, PropertyMap, PropertyTypeRecord,
};
use umbra::types::{CacheError, ElementId, ElementTypeId, LinkTypeId, PropertyTypeId, Result};

/// Installs the test subscriber once so `RUST_LOG` filters apply to runs.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Upstream call counters shared with the test body.
#[derive(Default)]
pub struct Spy {
    pub element_calls: AtomicUsize,
    pub element_type_calls: AtomicUsize,
    pub link_type_calls: AtomicUsize,
    pub property_type_calls: AtomicUsize,
    pub known_element_type_calls: AtomicUsize,
    pub known_link_type_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub link_calls: Mutex<Vec<(Vec<ElementId>, Vec<ElementId>)>>,
}

impl Spy {
    pub fn link_call_count(&self) -> usize {
        self.link_calls.lock().len()
    }

    pub fn link_calls(&self) -> Vec<(Vec<ElementId>, Vec<ElementId>)> {
        self.link_calls.lock().clone()
    }
}

/// In-memory upstream with a fixed element/link population.
#[derive(Default)]
pub struct FixtureProvider {
    pub spy: Arc<Spy>,
    pub elements: FxHashMap<ElementId, ElementRecord>,
    pub element_types: FxHashMap<ElementTypeId, ElementTypeRecord>,
    pub link_types: FxHashMap<LinkTypeId, LinkTypeRecord>,
    pub property_types: FxHashMap<PropertyTypeId, PropertyTypeRecord>,
    pub links: Vec<LinkRecord>,
    /// When set, `links` fails instead of answering.
    pub fail_links: AtomicBool,
    /// When set, `links` cancels this token before returning.
    pub cancel_during_links: Mutex<Option<CancellationToken>>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates one element record per identifier.
    pub fn with_elements(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.elements.insert(
                ElementId::from(*id),
                element(id),
            );
        }
        self
    }

    /// Adds an edge of the given type.
    pub fn with_link(mut self, ty: &str, source: &str, target: &str) -> Self {
        self.links.push(link(ty, source, target));
        self
    }

    pub fn with_element_type(mut self, id: &str) -> Self {
        self.element_types.insert(
            ElementTypeId::from(id),
            ElementTypeRecord {
                id: ElementTypeId::from(id),
                label: vec![id.to_uppercase()],
                instance_count: None,
            },
        );
        self
    }

    pub fn with_link_type(mut self, id: &str) -> Self {
        self.link_types.insert(
            LinkTypeId::from(id),
            LinkTypeRecord {
                id: LinkTypeId::from(id),
                label: vec![id.to_uppercase()],
            },
        );
        self
    }

    pub fn with_property_type(mut self, id: &str) -> Self {
        self.property_types.insert(
            PropertyTypeId::from(id),
            PropertyTypeRecord {
                id: PropertyTypeId::from(id),
                label: vec![id.to_uppercase()],
            },
        );
        self
    }
}

pub fn element(id: &str) -> ElementRecord {
    ElementRecord {
        id: ElementId::from(id),
        types: vec![ElementTypeId::from("thing")],
        label: vec![id.to_uppercase()],
        properties: PropertyMap::new(),
    }
}

pub fn link(ty: &str, source: &str, target: &str) -> LinkRecord {
    LinkRecord {
        link_type: LinkTypeId::from(ty),
        source: ElementId::from(source),
        target: ElementId::from(target),
        properties: PropertyMap::new(),
    }
}

pub fn ids(names: &[&str]) -> Vec<ElementId> {
    names.iter().map(|n| ElementId::from(*n)).collect()
}

#[derive(Debug, thiserror::Error)]
#[error("fixture upstream failure")]
struct FixtureFailure;

#[async_trait]
impl DataProvider for FixtureProvider {
    async fn known_element_types(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ElementTypeRecord>> {
        self.spy
            .known_element_type_calls
            .fetch_add(1, Ordering::SeqCst);
        let mut types: Vec<ElementTypeRecord> = self.element_types.values().cloned().collect();
        types.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(types)
    }

    async fn known_link_types(&self, _cancel: &CancellationToken) -> Result<Vec<LinkTypeRecord>> {
        self.spy.known_link_type_calls.fetch_add(1, Ordering::SeqCst);
        let mut types: Vec<LinkTypeRecord> = self.link_types.values().cloned().collect();
        types.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(types)
    }

    async fn element_types(
        &self,
        typ_ids: &[ElementTypeId],
        _cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementTypeId, ElementTypeRecord>> {
        self.spy.element_type_calls.fetch_add(1, Ordering::SeqCst);
        Ok(typ_ids
            .iter()
            .filter_map(|id| self.element_types.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn link_types(
        &self,
        typ_ids: &[LinkTypeId],
        _cancel: &CancellationToken,
    ) -> Result<FxHashMap<LinkTypeId, LinkTypeRecord>> {
        self.spy.link_type_calls.fetch_add(1, Ordering::SeqCst);
        Ok(typ_ids
            .iter()
            .filter_map(|id| self.link_types.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn property_types(
        &self,
        typ_ids: &[PropertyTypeId],
        _cancel: &CancellationToken,
    ) -> Result<FxHashMap<PropertyTypeId, PropertyTypeRecord>> {
        self.spy.property_type_calls.fetch_add(1, Ordering::SeqCst);
        Ok(typ_ids
            .iter()
            .filter_map(|id| {
                self.property_types
                    .get(id)
                    .map(|r| (id.clone(), r.clone()))
            })
            .collect())
    }

    async fn elements(
        &self,
        element_ids: &[ElementId],
        _cancel: &CancellationToken,
    ) -> Result<FxHashMap<ElementId, ElementRecord>> {
        self.spy.element_calls.fetch_add(1, Ordering::SeqCst);
        Ok(element_ids
            .iter()
            .filter_map(|id| self.elements.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn links(
        &self,
        primary: &[ElementId],
        secondary: &[ElementId],
        _cancel: &CancellationToken,
    ) -> Result<Vec<LinkRecord>> {
        self.spy
            .link_calls
            .lock()
            .push((primary.to_vec(), secondary.to_vec()));
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(CacheError::upstream(FixtureFailure));
        }
        if let Some(token) = self.cancel_during_links.lock().as_ref() {
            token.cancel();
        }
        Ok(self
            .links
            .iter()
            .filter(|l| {
                (primary.contains(&l.source) && secondary.contains(&l.target))
                    || (secondary.contains(&l.source) && primary.contains(&l.target))
            })
            .cloned()
            .collect())
    }

    async fn connected_link_stats(
        &self,
        element: &ElementId,
        inexact: bool,
        _cancel: &CancellationToken,
    ) -> Result<Vec<LinkCount>> {
        self.spy.stats_calls.fetch_add(1, Ordering::SeqCst);
        let mut counts: FxHashMap<LinkTypeId, LinkCount> = FxHashMap::default();
        for record in &self.links {
            if record.source == *element || record.target == *element {
                let entry = counts
                    .entry(record.link_type.clone())
                    .or_insert_with(|| LinkCount {
                        link_type: record.link_type.clone(),
                        in_count: 0,
                        out_count: 0,
                        inexact,
                    });
                if record.source == *element {
                    entry.out_count += 1;
                }
                if record.target == *element {
                    entry.in_count += 1;
                }
            }
        }
        let mut out: Vec<LinkCount> = counts.into_values().collect();
        out.sort_by(|a, b| a.link_type.cmp(&b.link_type));
        Ok(out)
    }

    async fn lookup(
        &self,
        params: &LookupParams,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        self.spy.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let needle = params.text.clone().unwrap_or_default().to_lowercase();
        let mut out: Vec<ElementRecord> = self
            .elements
            .values()
            .filter(|record| record.id.as_str().to_lowercase().contains(&needle))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = params.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
