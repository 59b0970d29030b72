//! The pool allocator.
//!
//! Strictly sequential over the priority-ordered claim list: each decision
//! depends on the exhaustion state left by the claims before it. Everything is
//! rebuilt from `hard` every call; the previous cycle's claimed totals are
//! never patched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use respool_core::claim::{Claim, PoolRef};
use respool_core::condition::{set_condition, Condition, ConditionType, Reason};
use respool_core::hash::{fingerprint_serde, Fingerprint};
use respool_core::id::Uid;
use respool_core::meta::OwnerReference;
use respool_core::pool::{ClaimEntry, Exhaustion, PoolStatus};
use respool_core::resources::{ResourceList, ResourceName};
use respool_ledger::{Blocked, Error as LedgerError, ExhaustionTracker, Ledger, Shortfall};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Decision {
    /// Already bound to this pool; re-confirmed, not re-evaluated.
    AlreadyBound,
    Bound,
    /// Ordered queue: an earlier claim already exhausted a requested resource.
    Queued { blocked: Vec<Blocked> },
    Exhausted { shortfalls: Vec<Shortfall> },
}

impl Decision {
    pub fn is_bound(&self) -> bool {
        matches!(self, Decision::AlreadyBound | Decision::Bound)
    }

    pub fn reason(&self) -> Reason {
        match self {
            Decision::AlreadyBound | Decision::Bound => Reason::Succeeded,
            Decision::Queued { .. } => Reason::QueueExhausted,
            Decision::Exhausted { .. } => Reason::PoolExhausted,
        }
    }

    pub fn message(&self, pool: &str) -> String {
        match self {
            Decision::AlreadyBound | Decision::Bound => format!("bound to pool {pool}"),
            Decision::Queued { blocked } => join(blocked),
            Decision::Exhausted { shortfalls } => join(shortfalls),
        }
    }

    pub fn condition(&self, pool: &str) -> Condition {
        Condition::new(
            ConditionType::Bound,
            self.is_bound(),
            self.reason(),
            self.message(pool),
        )
    }

    /// `Ready` for a fresh decision. An existing binding leaves `Ready` to the
    /// claim reconciler, which also reports refused migrations there.
    pub fn ready_condition(&self, pool: &str) -> Option<Condition> {
        match self {
            Decision::AlreadyBound => None,
            Decision::Bound => Some(Condition::new(ConditionType::Ready, true, Reason::Succeeded, "")),
            Decision::Queued { .. } | Decision::Exhausted { .. } => Some(Condition::new(
                ConditionType::Ready,
                false,
                self.reason(),
                self.message(pool),
            )),
        }
    }
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(T::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDecision {
    pub namespace: String,
    pub name: String,
    pub uid: Uid,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub ledger: Ledger,
    pub exhaustions: BTreeMap<ResourceName, Exhaustion>,
    /// In priority order.
    pub decisions: Vec<ClaimDecision>,
}

impl AllocationOutcome {
    /// Fingerprint of the ordered decision list.
    pub fn digest(&self) -> respool_core::error::Result<Fingerprint> {
        fingerprint_serde(&self.decisions)
    }

    pub fn decision_for(&self, uid: Uid) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| d.uid == uid)
            .map(|d| &d.decision)
    }

    pub fn newly_bound(&self) -> impl Iterator<Item = &ClaimDecision> {
        self.decisions
            .iter()
            .filter(|d| matches!(d.decision, Decision::Bound))
    }

    pub fn overcommitted(&self) -> Vec<ResourceName> {
        self.ledger.overcommitted()
    }

    /// Replace allocation, claims and exhaustions in `status`. Namespaces and
    /// conditions are the reconciler's business.
    pub fn write_status(&self, status: &mut PoolStatus) {
        self.ledger.write_status(status);
        status.exhaustions = self.exhaustions.clone();
    }
}

/// Decide every claim of one pool.
///
/// `claims` should already be restricted to in-scope namespaces and exclude
/// released or deleting claims. They are re-sorted by priority here, so the
/// caller's order does not matter. Bound claims are counted at their current
/// request; see [`allocate_admitted`] for the controller's variant.
pub fn allocate(
    pool_uid: Uid,
    hard: &ResourceList,
    claims: &[Claim],
    ordered_queue: bool,
) -> AllocationOutcome {
    allocate_admitted(pool_uid, hard, claims, ordered_queue, &BTreeMap::new())
}

/// Like [`allocate`], but a claim already bound to the pool holds the request
/// it was admitted with, as recorded in `admitted` (a pool's `status.claims`).
/// Editing a bound claim's request does not change what it holds. A bound
/// claim missing from `admitted` is counted at its current request.
pub fn allocate_admitted(
    pool_uid: Uid,
    hard: &ResourceList,
    claims: &[Claim],
    ordered_queue: bool,
    admitted: &BTreeMap<String, Vec<ClaimEntry>>,
) -> AllocationOutcome {
    let mut order: Vec<&Claim> = claims.iter().collect();
    order.sort_by_cached_key(|c| c.order_key());

    let held: BTreeMap<Uid, &ResourceList> = admitted
        .values()
        .flatten()
        .map(|e| (e.uid, &e.claims))
        .collect();

    // Existing bindings hold their capacity before anything new is admitted.
    let mut ledger = Ledger::new(hard.clone());
    for claim in order.iter().filter(|c| c.is_bound_to(pool_uid)) {
        if ledger.is_recorded(claim.uid()) {
            continue;
        }
        let mut entry = claim.entry();
        if let Some(request) = held.get(&claim.uid()) {
            entry.claims = (*request).clone();
        }
        ledger.record(claim.namespace(), entry);
    }

    let mut tracker = ExhaustionTracker::new();
    let mut decisions = Vec::with_capacity(order.len());
    for claim in order {
        let decision = if claim.is_bound_to(pool_uid) {
            Decision::AlreadyBound
        } else {
            evaluate(&mut ledger, &mut tracker, claim, ordered_queue)
        };
        decisions.push(ClaimDecision {
            namespace: claim.namespace().to_string(),
            name: claim.name().to_string(),
            uid: claim.uid(),
            decision,
        });
    }

    AllocationOutcome {
        ledger,
        exhaustions: tracker.into_map(),
        decisions,
    }
}

fn evaluate(
    ledger: &mut Ledger,
    tracker: &mut ExhaustionTracker,
    claim: &Claim,
    ordered_queue: bool,
) -> Decision {
    if ordered_queue {
        let blocked = tracker.blocked(&claim.spec.resource_claims);
        if !blocked.is_empty() {
            return Decision::Queued { blocked };
        }
    }

    match ledger.try_reserve(claim.namespace(), claim.entry()) {
        Ok(()) => Decision::Bound,
        Err(LedgerError::Insufficient(shortfalls)) => {
            for s in &shortfalls {
                tracker.record(s);
            }
            Decision::Exhausted { shortfalls }
        }
        // Same uid listed twice; the first occurrence holds the capacity.
        Err(LedgerError::AlreadyRecorded { .. }) => Decision::AlreadyBound,
    }
}

/// What `apply_decision` touched on the claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub metadata: bool,
    pub status: bool,
}

impl Applied {
    pub fn any(&self) -> bool {
        self.metadata || self.status
    }
}

/// Project a decision onto a claim: bindings get exactly one pool owner
/// reference and `status.pool`; every decision sets the `Bound` condition,
/// and fresh decisions set `Ready` to match.
pub fn apply_decision(
    claim: &mut Claim,
    pool_name: &str,
    pool_uid: Uid,
    decision: &Decision,
) -> Applied {
    let mut applied = Applied::default();
    if decision.is_bound() {
        applied.metadata = claim
            .metadata
            .set_pool_owner(OwnerReference::pool(pool_name, pool_uid));
        let target = PoolRef {
            name: pool_name.to_string(),
            uid: pool_uid,
        };
        if claim.status.pool.as_ref() != Some(&target) {
            claim.status.pool = Some(target);
            applied.status = true;
        }
    }
    applied.status |= set_condition(&mut claim.status.conditions, decision.condition(pool_name));
    if let Some(ready) = decision.ready_condition(pool_name) {
        applied.status |= set_condition(&mut claim.status.conditions, ready);
    }
    applied
}
