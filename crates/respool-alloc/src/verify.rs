//! Debug-time verification helpers for allocation outcomes.
//!
//! Meant for tests and debug assertions. They panic on violation and should
//! stay cheap.

use respool_core::claim::Claim;
use respool_core::order::is_priority_ordered;
use respool_core::resources::ResourceList;

use crate::allocator::{AllocationOutcome, Decision};

/// Claims must be sorted by `(creation, name, namespace)`.
pub fn assert_priority_order(claims: &[Claim]) {
    assert!(
        is_priority_ordered(claims),
        "claims are not in priority order"
    );
}

/// Claimed totals equal the sum of bound requests (the recorded request for
/// existing bindings), overall and per namespace,
/// and only pre-existing bindings may push claimed above hard.
pub fn assert_conserved(outcome: &AllocationOutcome, claims: &[Claim]) {
    let mut bound = ResourceList::new();
    let mut held = ResourceList::new();
    for d in &outcome.decisions {
        let Some(claim) = claims.iter().find(|c| c.uid() == d.uid) else {
            panic!("decision for unknown claim {}/{}", d.namespace, d.name);
        };
        match d.decision {
            Decision::Bound => bound.add(&claim.spec.resource_claims),
            // Existing bindings may hold an earlier admitted request.
            Decision::AlreadyBound => {
                let recorded = outcome
                    .ledger
                    .claims()
                    .values()
                    .flatten()
                    .find(|e| e.uid == d.uid);
                match recorded {
                    Some(e) => held.add(&e.claims),
                    None => panic!("bound claim {}/{} not in the ledger", d.namespace, d.name),
                }
            }
            _ => {}
        }
    }

    let mut expected = held.clone();
    expected.add(&bound);
    for (name, qty) in outcome.ledger.claimed().iter() {
        assert_eq!(
            qty,
            expected.get_or_zero(name),
            "claimed {name} does not match bound requests"
        );
    }

    let mut per_ns = ResourceList::new();
    for total in outcome.ledger.namespace_totals().values() {
        per_ns.add(total);
    }
    for (name, qty) in per_ns.iter() {
        assert_eq!(
            qty,
            outcome.ledger.claimed().get_or_zero(name),
            "namespace totals for {name} do not sum to claimed"
        );
    }

    let hard = outcome.ledger.hard();
    for name in outcome.ledger.overcommitted() {
        assert!(
            held.get_or_zero(&name) > hard.get_or_zero(&name),
            "new bindings over-committed {name}"
        );
    }
}
