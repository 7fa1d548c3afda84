//! Adjacency ranges, blocks, and the rectangular subtraction that computes
//! which sub-regions of a requested block are not yet covered by the cache.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::ElementId;

/// An immutable, sorted, deduplicated set of endpoint identifiers.
///
/// Ranges compare by content, never by identity; two ranges built from the
/// same members in any order are equal and hash alike.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdjacencyRange {
    members: Vec<ElementId>,
}

impl AdjacencyRange {
    /// Builds a range from arbitrary members, sorting and deduplicating.
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator<Item = ElementId>,
    {
        let mut members: Vec<ElementId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Self { members }
    }

    /// Builds a range from members already sorted and deduplicated.
    pub fn from_sorted(members: Vec<ElementId>) -> Self {
        debug_assert!(
            members.windows(2).all(|w| w[0] < w[1]),
            "range members must be strictly ascending"
        );
        Self { members }
    }

    /// Empty range.
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` for the empty range.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Membership test via binary search.
    pub fn contains(&self, id: &ElementId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    /// Iterates members in ascending order.
    pub fn iter(&self) -> std::slice::Iter<'_, ElementId> {
        self.members.iter()
    }

    /// Members as an ordered slice.
    pub fn as_slice(&self) -> &[ElementId] {
        &self.members
    }

    /// Set union preserving order.
    pub fn union(&self, other: &AdjacencyRange) -> AdjacencyRange {
        let mut merged = Vec::with_capacity(self.len() + other.len());
        let (mut a, mut b) = (self.members.iter().peekable(), other.members.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => match x.cmp(y) {
                    std::cmp::Ordering::Less => merged.push(a.next().cloned().unwrap()),
                    std::cmp::Ordering::Greater => merged.push(b.next().cloned().unwrap()),
                    std::cmp::Ordering::Equal => {
                        merged.push(a.next().cloned().unwrap());
                        b.next();
                    }
                },
                (Some(_), None) => merged.push(a.next().cloned().unwrap()),
                (None, Some(_)) => merged.push(b.next().cloned().unwrap()),
                (None, None) => break,
            }
        }
        AdjacencyRange { members: merged }
    }
}

impl<'a> IntoIterator for &'a AdjacencyRange {
    type Item = &'a ElementId;
    type IntoIter = std::slice::Iter<'a, ElementId>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

/// A source-range × target-range cross-product region of the adjacency
/// space: "all connections between every source and every target here are
/// known".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdjacencyBlock {
    /// Source side of the region.
    pub sources: AdjacencyRange,
    /// Target side of the region.
    pub targets: AdjacencyRange,
}

impl AdjacencyBlock {
    /// Builds a block from the two ranges.
    pub fn new(sources: AdjacencyRange, targets: AdjacencyRange) -> Self {
        Self { sources, targets }
    }

    /// Number of source×target pairs in the region.
    pub fn pair_count(&self) -> usize {
        self.sources.len() * self.targets.len()
    }
}

/// Computes the minimal residual blocks whose union exactly covers
/// `base.sources × base.targets` minus the union of all covering products.
///
/// Covering targets are unioned per base source before the leftover is
/// taken, so the result stays exact even when covering blocks share
/// sources, and is invariant under reordering of `covering` by
/// construction. Sources ending up with the same leftover target set are
/// merged into one residual block; sources untouched by every covering
/// block come out against the full base target set.
pub fn subtract_blocks(base: &AdjacencyBlock, covering: &[AdjacencyBlock]) -> Vec<AdjacencyBlock> {
    if base.sources.is_empty() || base.targets.is_empty() {
        return Vec::new();
    }
    if covering.is_empty() {
        return vec![base.clone()];
    }

    let mut covered: FxHashMap<&ElementId, FxHashSet<&ElementId>> = FxHashMap::default();
    for block in covering {
        for source in block.sources.iter().filter(|s| base.sources.contains(s)) {
            let targets = covered.entry(source).or_default();
            targets.extend(block.targets.iter().filter(|t| base.targets.contains(t)));
        }
    }

    let mut order: Vec<AdjacencyRange> = Vec::new();
    let mut groups: FxHashMap<AdjacencyRange, Vec<ElementId>> = FxHashMap::default();
    for source in base.sources.iter() {
        let leftover = match covered.get(source) {
            Some(known) => AdjacencyRange::from_sorted(
                base.targets
                    .iter()
                    .filter(|t| !known.contains(*t))
                    .cloned()
                    .collect(),
            ),
            None => base.targets.clone(),
        };
        if leftover.is_empty() {
            continue;
        }
        match groups.get_mut(&leftover) {
            Some(sources) => sources.push(source.clone()),
            None => {
                groups.insert(leftover.clone(), vec![source.clone()]);
                order.push(leftover);
            }
        }
    }

    order
        .into_iter()
        .map(|targets| {
            let sources = groups.remove(&targets).expect("group recorded for leftover");
            AdjacencyBlock::new(AdjacencyRange::from_sorted(sources), targets)
        })
        .collect()
}
