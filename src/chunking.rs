//! Splits large cross-product link requests into bounded sub-requests.
//!
//! The chunker covers the undirected all-pairs relationship between two
//! nodesets with directed `{sources, targets}` chunks whose combined
//! measured size stays within a budget. Both orientations of every pair are
//! emitted (a forward and a reverse pass) so direction-sensitive providers
//! see each pair from both sides; when the two inputs have identical length
//! the reverse pass drops targets already present in the chunk's source
//! group, which keeps self pairs `(x, x)` from being requested twice. That
//! equal-length trigger is deliberately asymmetric and is relied upon by the
//! link-range update path to avoid double-counting self loops; do not
//! generalize it.

use crate::types::ElementId;

/// One bounded sub-request of a cross-product fetch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CrossChunk {
    /// Source identifiers of this sub-request.
    pub sources: Vec<ElementId>,
    /// Target identifiers of this sub-request.
    pub targets: Vec<ElementId>,
}

/// Splits the all-pairs relationship between `a` and `b` into chunks whose
/// combined measure stays at or below `budget`.
///
/// The larger input drives source grouping: groups accumulate until they
/// reach half the budget, then each group is paired with greedy target
/// chunks filling the remainder. A single item whose measure alone exceeds
/// the budget still forms its own oversized chunk rather than being
/// dropped.
pub fn chunk_cross_product<M>(
    a: &[ElementId],
    b: &[ElementId],
    measure: M,
    budget: usize,
) -> Vec<CrossChunk>
where
    M: Fn(&ElementId) -> usize,
{
    let (main, paired) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut chunks = directed_chunks(main, paired, &measure, budget, false);
    let skip_shared = main.len() == paired.len();
    chunks.extend(directed_chunks(paired, main, &measure, budget, skip_shared));
    chunks
}

fn directed_chunks<M>(
    sources: &[ElementId],
    targets: &[ElementId],
    measure: &M,
    budget: usize,
    skip_shared: bool,
) -> Vec<CrossChunk>
where
    M: Fn(&ElementId) -> usize,
{
    let half = (budget / 2).max(1);
    let mut out = Vec::new();
    let mut next = 0;
    while next < sources.len() {
        let mut group = Vec::new();
        let mut group_size = 0;
        while next < sources.len() && (group.is_empty() || group_size < half) {
            group_size += measure(&sources[next]);
            group.push(sources[next].clone());
            next += 1;
        }

        let mut batch = Vec::new();
        let mut batch_size = 0;
        for target in targets {
            if skip_shared && group.contains(target) {
                continue;
            }
            let item = measure(target);
            if !batch.is_empty() && group_size + batch_size + item > budget {
                out.push(CrossChunk {
                    sources: group.clone(),
                    targets: std::mem::take(&mut batch),
                });
                batch_size = 0;
            }
            batch.push(target.clone());
            batch_size += item;
        }
        if !batch.is_empty() {
            out.push(CrossChunk {
                sources: group,
                targets: batch,
            });
        }
    }
    out
}
