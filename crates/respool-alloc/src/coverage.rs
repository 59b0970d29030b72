//! Usage-coverage reconstruction.
//!
//! Given an observed aggregate usage vector and the candidate claims of a
//! scope, pick a small deterministic set of claims whose requests explain the
//! usage. This is a greedy heuristic, not an exact set-cover solver: each round
//! takes the candidate covering the most remaining usage, and ties go to the
//! candidate earliest in priority order.

use respool_core::claim::Claim;
use respool_core::resources::ResourceList;

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSelection<'a> {
    /// In selection order.
    pub selected: Vec<&'a Claim>,
    /// Usage no candidate could explain. Only non-zero entries are kept.
    pub unexplained: ResourceList,
}

impl<'a> CoverageSelection<'a> {
    fn empty() -> Self {
        Self {
            selected: Vec::new(),
            unexplained: ResourceList::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unexplained.is_empty()
    }
}

/// Σ over resources of `min(remaining, request)`, in milli-units, skipping
/// resources where either side is zero.
fn score(remaining: &ResourceList, request: &ResourceList) -> i128 {
    request
        .iter()
        .filter(|(_, req)| req.is_positive())
        .map(|(name, req)| {
            let rem = remaining.get_or_zero(name);
            if rem.is_positive() {
                rem.min(req).milli()
            } else {
                0
            }
        })
        .fold(0, i128::saturating_add)
}

pub fn select_claims_covering_usage_greedy<'a>(
    usage: &ResourceList,
    candidates: &'a [Claim],
) -> CoverageSelection<'a> {
    if usage.is_all_zero() || candidates.is_empty() {
        return CoverageSelection::empty();
    }

    let mut order: Vec<&'a Claim> = candidates.iter().collect();
    order.sort_by_cached_key(|c| c.order_key());

    let mut remaining = usage.clone();
    let mut taken = vec![false; order.len()];
    let mut selected = Vec::new();

    while !remaining.is_all_zero() {
        let mut best: Option<(usize, i128)> = None;
        for (idx, claim) in order.iter().enumerate() {
            if taken[idx] {
                continue;
            }
            let s = score(&remaining, &claim.spec.resource_claims);
            // Strictly greater: the earlier candidate keeps a tie.
            if s > 0 && best.map_or(true, |(_, top)| s > top) {
                best = Some((idx, s));
            }
        }
        let Some((idx, _)) = best else { break };
        taken[idx] = true;
        remaining.sub_clamped(&order[idx].spec.resource_claims);
        selected.push(order[idx]);
    }

    let unexplained = remaining
        .iter()
        .filter(|(_, q)| q.is_positive())
        .map(|(n, q)| (n.clone(), q))
        .collect::<ResourceList>();

    CoverageSelection {
        selected,
        unexplained,
    }
}

/// Sum of the requests of a selection. Handy for reporting how much of the
/// usage the chosen claims account for.
pub fn covered_total(selection: &CoverageSelection<'_>) -> ResourceList {
    let mut total = ResourceList::new();
    for c in &selection.selected {
        total.add(&c.spec.resource_claims);
    }
    total
}
