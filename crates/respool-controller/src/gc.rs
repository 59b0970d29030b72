//! Garbage collection of claims and namespaces that left a pool's scope.
//!
//! Runs before allocation in every pool cycle. It only ever subtracts from the
//! pool's claimed totals; nothing is bound here. Each disassociation re-reads
//! the claim, so running twice with no state change disassociates nothing the
//! second time.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use respool_core::claim::Claim;
use respool_core::condition::{set_condition, Condition, ConditionType, Reason};
use respool_core::id::Uid;
use respool_core::meta::ObjectRef;
use respool_core::pool::{ClaimEntry, Pool};
use respool_store::{retry_on_conflict, EventType, StoreError};

use crate::context::Context;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disassociated {
    pub namespace: String,
    pub name: String,
    pub uid: Uid,
    /// False when the claim was already gone or unbound; it was only untracked.
    pub touched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub removed_namespaces: Vec<String>,
    pub disassociated: Vec<Disassociated>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.removed_namespaces.is_empty() && self.disassociated.is_empty()
    }
}

#[derive(Clone)]
pub struct GarbageCollector {
    ctx: Context,
}

impl GarbageCollector {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Drop namespaces outside `matching` and tracked claims absent from
    /// `live`, updating `pool.status` in place.
    pub async fn collect(&self, pool: &mut Pool, matching: &[String], live: &[Claim]) -> Result<GcReport> {
        let matching: BTreeSet<&str> = matching.iter().map(String::as_str).collect();
        let live: BTreeSet<Uid> = live.iter().map(Claim::uid).collect();
        let mut report = GcReport::default();

        let stale_namespaces: Vec<String> = pool
            .status
            .namespaces
            .iter()
            .chain(pool.status.claims.keys())
            .filter(|ns| !matching.contains(ns.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut doomed: Vec<(String, ClaimEntry)> = Vec::new();
        for ns in &stale_namespaces {
            self.ctx.mirrors.delete_mirror(ns, pool.name()).await?;
            debug!(pool = pool.name(), namespace = %ns, "namespace left pool");
            if let Some(entries) = pool.status.claims.get(ns) {
                doomed.extend(entries.iter().map(|e| (ns.clone(), e.clone())));
            }
        }
        for (ns, entry) in pool.status.tracked_claims() {
            if matching.contains(ns) && !live.contains(&entry.uid) {
                doomed.push((ns.to_string(), entry.clone()));
            }
        }
        // Bound through the index but never counted, e.g. a cycle that bound
        // the claim and then failed to write pool status.
        let mut seen: BTreeSet<Uid> = doomed.iter().map(|(_, e)| e.uid).collect();
        for claim in self.ctx.claims.list_claims_by_pool_uid(pool.uid()).await? {
            if claim.is_bound_to(pool.uid()) && !live.contains(&claim.uid()) && seen.insert(claim.uid()) {
                debug!(claim = %claim.object_ref(), pool = pool.name(), "untracked binding");
                doomed.push((claim.namespace().to_string(), claim.entry()));
            }
        }

        for (ns, entry) in doomed {
            let touched = self.disassociate(pool, &ns, &entry).await?;
            if let Some(released) = pool.status.untrack(&ns, entry.uid) {
                pool.status.allocation.claimed.sub_clamped(&released.claims);
            }
            report.disassociated.push(Disassociated {
                namespace: ns,
                name: entry.name,
                uid: entry.uid,
                touched,
            });
        }

        pool.status.allocation.available = pool
            .status
            .allocation
            .hard
            .minus_clamped(&pool.status.allocation.claimed);
        pool.status
            .namespaces
            .retain(|ns| matching.contains(ns.as_str()));
        pool.status.recount();
        report.removed_namespaces = stale_namespaces;

        if !report.is_empty() {
            info!(
                pool = pool.name(),
                namespaces = report.removed_namespaces.len(),
                claims = report.disassociated.len(),
                "garbage collected"
            );
        }
        Ok(report)
    }

    /// Unbind one claim from `pool`. Returns whether the claim was changed.
    pub async fn disassociate(&self, pool: &Pool, namespace: &str, entry: &ClaimEntry) -> Result<bool> {
        let claims = &self.ctx.claims;
        let (pool_name, pool_uid) = (pool.name(), pool.uid());
        let drop_owner = pool.spec.config.delete_bound_resources;
        let name = entry.name.as_str();
        let uid = entry.uid;

        let changed = retry_on_conflict(&self.ctx.retry, "disassociate", move || async move {
            let mut claim = match claims.get_claim(namespace, name).await {
                Ok(c) => c,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            if claim.uid() != uid || !claim.is_bound_to(pool_uid) {
                return Ok(false);
            }

            if drop_owner && !claim.is_marked_for_release() && claim.metadata.remove_pool_owner(Some(pool_uid)) {
                claim = claims.update_claim(&claim).await?;
            }
            claim.status.pool = None;
            let message = format!("disassociated from pool {pool_name}");
            for type_ in [ConditionType::Bound, ConditionType::Ready] {
                set_condition(
                    &mut claim.status.conditions,
                    Condition::new(type_, false, Reason::Disassociated, message.clone()),
                );
            }
            claims.update_claim_status(&claim).await?;
            Ok::<bool, StoreError>(true)
        })
        .await?;

        if changed {
            let subject = ObjectRef::claim(namespace, entry.name.as_str());
            self.ctx.notifier.notify(
                &subject,
                EventType::Normal,
                "Disassociated",
                &format!("claim disassociated from pool {pool_name}"),
            );
            info!(claim = %subject, pool = pool_name, "disassociated");
        }
        Ok(changed)
    }
}
