//! Metrics as structured tracing events.
//!
//! Gauges go out under the `respool::metrics` target so a subscriber can route
//! them to a real backend. Nothing here keeps state.

use respool_alloc::{ClaimDecision, Decision};
use respool_core::hash::Fingerprint;
use respool_core::pool::Pool;
use respool_core::quantity::exhaustion_percent;

/// Emit one metric event with free-form key/values.
pub fn emit(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!(target: "respool::metrics", "metric", event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::trace!(target: "respool::metrics", %event, %k, %v, "metric");
    }
}

/// Per-resource allocation gauges, plus exhaustion percentage where defined.
pub fn record_pool(pool: &Pool) {
    let alloc = &pool.status.allocation;
    for (resource, hard) in alloc.hard.iter() {
        tracing::info!(
            target: "respool::metrics",
            pool = pool.name(),
            resource = %resource,
            hard = %hard,
            claimed = %alloc.claimed.get_or_zero(resource),
            available = %alloc.available.get_or_zero(resource),
            "pool allocation"
        );
    }
    for (resource, e) in &pool.status.exhaustions {
        match exhaustion_percent(e.requesting, e.available) {
            Some(percent) => tracing::info!(
                target: "respool::metrics",
                pool = pool.name(),
                resource = %resource,
                requesting = %e.requesting,
                available = %e.available,
                percent,
                "pool exhaustion"
            ),
            None => tracing::info!(
                target: "respool::metrics",
                pool = pool.name(),
                resource = %resource,
                requesting = %e.requesting,
                "pool exhaustion, nothing available"
            ),
        }
    }
    emit(
        "pool_size",
        &[
            ("pool", pool.name().to_string()),
            ("namespaces", pool.status.namespace_size.to_string()),
            ("claims", pool.status.claim_size.to_string()),
        ],
    );
}

pub fn record_decisions(pool: &str, decisions: &[ClaimDecision], digest: &Fingerprint) {
    let mut counts = [0usize; 4];
    for d in decisions {
        let slot = match d.decision {
            Decision::AlreadyBound => 0,
            Decision::Bound => 1,
            Decision::Queued { .. } => 2,
            Decision::Exhausted { .. } => 3,
        };
        counts[slot] += 1;
    }
    tracing::info!(
        target: "respool::metrics",
        pool,
        already_bound = counts[0],
        bound = counts[1],
        queued = counts[2],
        exhausted = counts[3],
        digest = %digest.short(),
        "allocation cycle"
    );
}
