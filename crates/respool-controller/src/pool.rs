//! Pool reconciler: one full, level-triggered allocation cycle per call.
//!
//! Cycle: resolve namespaces, gather claims, garbage-collect, allocate, write
//! claim decisions, write pool status and finalizer, then fan out namespace
//! mirrors and join. A deleting pool is treated as selecting no namespace, so
//! the same path unbinds everything before the finalizer comes off.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use respool_alloc::{allocate_admitted, apply_decision, AllocationOutcome, ClaimDecision, Decision};
use respool_core::claim::Claim;
use respool_core::condition::{set_condition, Condition, ConditionType, Reason};
use respool_core::hash::Fingerprint;
use respool_core::meta::ObjectRef;
use respool_core::pool::{Pool, PoolStatus};
use respool_core::POOL_FINALIZER;
use respool_store::{retry_on_conflict, EventType, StoreError};

use crate::admission::admit;
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::gc::{GarbageCollector, GcReport};
use crate::metrics;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolReport {
    pub pool: String,
    pub namespaces: Vec<String>,
    pub gc: GcReport,
    pub decisions: Vec<ClaimDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Fingerprint>,
    /// The pool no longer exists after this cycle (or never did).
    pub removed: bool,
}

impl PoolReport {
    fn gone(name: &str) -> Self {
        Self {
            pool: name.to_string(),
            removed: true,
            ..Self::default()
        }
    }
}

/// A bound claim keeps the request it was admitted with; later edits to its
/// spec are not honored until it is released and claimed again.
fn warn_edited_requests(pool: &Pool, live: &[Claim]) {
    for claim in live {
        let admitted = pool
            .status
            .claims
            .get(claim.namespace())
            .and_then(|entries| entries.iter().find(|e| e.uid == claim.uid()));
        if let Some(entry) = admitted.filter(|e| e.claims != claim.spec.resource_claims) {
            warn!(
                claim = %claim.object_ref(),
                admitted = %entry.claims,
                requested = %claim.spec.resource_claims,
                "bound claim request changed; holding the admitted request"
            );
        }
    }
}

#[derive(Clone)]
pub struct PoolReconciler {
    ctx: Context,
    gc: GarbageCollector,
}

impl PoolReconciler {
    pub fn new(ctx: Context) -> Self {
        let gc = GarbageCollector::new(ctx.clone());
        Self { ctx, gc }
    }

    pub async fn reconcile(&self, name: &str) -> Result<PoolReport> {
        let pool = match self.ctx.pools.get_pool(name).await {
            Ok(p) => p,
            Err(e) if e.is_not_found() => return Ok(PoolReport::gone(name)),
            Err(e) => return Err(e.into()),
        };

        match self.cycle(pool).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.mark_not_ready(name, &err).await;
                Err(err)
            }
        }
    }

    /// Decisions a cycle would make right now, without writing anything.
    pub async fn plan(&self, name: &str) -> Result<AllocationOutcome> {
        let pool = self.ctx.pools.get_pool(name).await?;
        let matching = self.matching_namespaces(&pool).await?;
        let (candidates, _) = self.gather_claims(&pool, &matching).await?;
        Ok(allocate_admitted(
            pool.uid(),
            &pool.spec.hard,
            &candidates,
            pool.spec.config.ordered_queue,
            &pool.status.claims,
        ))
    }

    async fn matching_namespaces(&self, pool: &Pool) -> Result<Vec<String>> {
        if pool.metadata.is_deleting() {
            return Ok(Vec::new());
        }
        Ok(self
            .ctx
            .namespaces
            .matching_namespaces(&pool.spec.selectors)
            .await?)
    }

    /// Allocation candidates and the subset that is live and bound here.
    ///
    /// Candidates are active claims in matching namespaces that are either
    /// bound to this pool (found through the pool-uid index), or unbound,
    /// targeting it, and admissible.
    async fn gather_claims(&self, pool: &Pool, matching: &[String]) -> Result<(Vec<Claim>, Vec<Claim>)> {
        let in_scope: BTreeSet<&str> = matching.iter().map(String::as_str).collect();
        let mut candidates: Vec<Claim> = self
            .ctx
            .claims
            .list_claims_by_pool_uid(pool.uid())
            .await?
            .into_iter()
            .filter(|c| c.is_active() && c.is_bound_to(pool.uid()) && in_scope.contains(c.namespace()))
            .collect();

        // Admit against this cycle's namespace set, not the last persisted one.
        let mut current = pool.clone();
        current.status.namespaces = matching.to_vec();
        for ns in matching {
            for claim in self.ctx.claims.list_claims(Some(ns)).await? {
                if claim.is_active()
                    && !claim.is_bound()
                    && claim.spec.pool == pool.name()
                    && admit(&claim, Some(&current)).is_ok()
                {
                    candidates.push(claim);
                }
            }
        }
        let live = candidates
            .iter()
            .filter(|c| c.is_bound_to(pool.uid()))
            .cloned()
            .collect();
        Ok((candidates, live))
    }

    async fn cycle(&self, mut pool: Pool) -> Result<PoolReport> {
        let name = pool.name().to_string();
        let matching = self.matching_namespaces(&pool).await?;
        let (candidates, live) = self.gather_claims(&pool, &matching).await?;

        let gc = self.gc.collect(&mut pool, &matching, &live).await?;
        pool.status.namespaces = matching.clone();

        warn_edited_requests(&pool, &live);
        let outcome = allocate_admitted(
            pool.uid(),
            &pool.spec.hard,
            &candidates,
            pool.spec.config.ordered_queue,
            &pool.status.claims,
        );
        let overcommitted = outcome.overcommitted();
        if !overcommitted.is_empty() {
            warn!(
                pool = %name,
                resources = ?overcommitted,
                "bound claims exceed hard limits; available clamped at zero"
            );
        }
        let digest = outcome.digest()?;
        debug!(pool = %name, digest = %digest.short(), claims = outcome.decisions.len(), "allocation decided");

        self.write_decisions(&pool, &outcome.decisions).await?;

        let mut status = pool.status.clone();
        outcome.write_status(&mut status);
        status.namespaces = matching.clone();
        status.recount();
        set_condition(
            &mut status.conditions,
            Condition::new(ConditionType::Ready, true, Reason::Succeeded, ""),
        );

        let Some(written) = self.write_pool(&pool, status).await? else {
            info!(pool = %name, "pool deleted after releasing its claims");
            return Ok(PoolReport {
                pool: name,
                namespaces: Vec::new(),
                gc,
                decisions: outcome.decisions,
                digest: Some(digest),
                removed: true,
            });
        };

        self.sync_mirrors(&written, &matching).await?;
        metrics::record_pool(&written);
        metrics::record_decisions(&name, &outcome.decisions, &digest);

        Ok(PoolReport {
            pool: name,
            namespaces: matching,
            gc,
            decisions: outcome.decisions,
            digest: Some(digest),
            removed: false,
        })
    }

    /// Project every decision onto its claim, in priority order.
    async fn write_decisions(&self, pool: &Pool, decisions: &[ClaimDecision]) -> Result<()> {
        let claims = &self.ctx.claims;
        let (pool_name, pool_uid) = (pool.name(), pool.uid());

        for d in decisions {
            debug!(
                pool = pool_name,
                namespace = %d.namespace,
                claim = %d.name,
                reason = %d.decision.reason(),
                "decision"
            );
            let decision = &d.decision;
            let (ns, name, uid) = (d.namespace.as_str(), d.name.as_str(), d.uid);

            let wrote = retry_on_conflict(&self.ctx.retry, "claim decision", move || async move {
                let mut claim = match claims.get_claim(ns, name).await {
                    Ok(c) => c,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => return Err(e),
                };
                if claim.uid() != uid || !claim.is_active() {
                    return Ok(false);
                }
                if claim.is_bound() && !claim.is_bound_to(pool_uid) {
                    return Ok(false);
                }
                let applied = apply_decision(&mut claim, pool_name, pool_uid, decision);
                if applied.metadata {
                    let status = claim.status.clone();
                    claim = claims.update_claim(&claim).await?;
                    claim.status = status;
                }
                if applied.status {
                    claims.update_claim_status(&claim).await?;
                }
                Ok::<bool, StoreError>(applied.any())
            })
            .await?;

            if wrote && matches!(decision, Decision::Bound) {
                let subject = ObjectRef::claim(d.namespace.as_str(), d.name.as_str());
                info!(claim = %subject, pool = pool_name, "bound");
                self.ctx.notifier.notify(
                    &subject,
                    EventType::Normal,
                    "Bound",
                    &format!("bound to pool {pool_name}"),
                );
            }
        }
        Ok(())
    }

    /// Write status, then reconcile the finalizer against `claim_size`.
    /// Returns `None` once the store has removed a deleting pool.
    async fn write_pool(&self, pool: &Pool, status: PoolStatus) -> Result<Option<Pool>> {
        let pools = &self.ctx.pools;
        let name = pool.name();
        let status = &status;

        let written = retry_on_conflict(&self.ctx.retry, "pool status", move || async move {
            let mut latest = match pools.get_pool(name).await {
                Ok(p) => p,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            if latest.status != *status {
                latest.status = status.clone();
                latest = pools.update_pool_status(&latest).await?;
            }
            Ok::<Option<Pool>, StoreError>(Some(latest))
        })
        .await?;
        let Some(written) = written else {
            return Ok(None);
        };

        let needs_finalizer = written.status.claim_size > 0;
        if needs_finalizer == written.metadata.has_finalizer(POOL_FINALIZER) {
            return Ok(Some(written));
        }

        let updated = retry_on_conflict(&self.ctx.retry, "pool finalizer", move || async move {
            let mut latest = match pools.get_pool(name).await {
                Ok(p) => p,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };
            let changed = if latest.status.claim_size > 0 {
                latest.metadata.add_finalizer(POOL_FINALIZER)
            } else {
                latest.metadata.remove_finalizer(POOL_FINALIZER)
            };
            if changed {
                latest = pools.update_pool(&latest).await?;
            }
            Ok::<Option<Pool>, StoreError>(Some(latest))
        })
        .await?;

        match updated {
            Some(p) if p.metadata.is_deleting() && p.metadata.finalizers.is_empty() => Ok(None),
            other => Ok(other),
        }
    }

    /// One task per matching namespace; any failure fails the join.
    async fn sync_mirrors(&self, pool: &Pool, namespaces: &[String]) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.ctx.config.max_parallel_mirrors));
        let mut tasks = JoinSet::new();

        for ns in namespaces {
            let limits = pool.mirror_limits(ns);
            let mirrors = Arc::clone(&self.ctx.mirrors);
            let permits = Arc::clone(&permits);
            let (ns, pool_name) = (ns.clone(), pool.name().to_string());
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await?;
                mirrors
                    .sync_mirror(&ns, &pool_name, &limits)
                    .await
                    .map_err(|source| ReconcileError::Mirror {
                        pool: pool_name.clone(),
                        source,
                    })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        Ok(())
    }

    /// Best effort: record the failure on the pool's Ready condition.
    async fn mark_not_ready(&self, name: &str, err: &ReconcileError) {
        let pools = &self.ctx.pools;
        let cond = Condition::new(ConditionType::Ready, false, Reason::Failed, err.to_string());
        let cond = &cond;
        let result = retry_on_conflict(&self.ctx.retry, "pool ready", move || async move {
            let mut latest = pools.get_pool(name).await?;
            if set_condition(&mut latest.status.conditions, cond.clone()) {
                pools.update_pool_status(&latest).await?;
            }
            Ok::<(), StoreError>(())
        })
        .await;
        if let Err(e) = result {
            warn!(pool = name, error = %e, "could not record pool failure");
        }
    }
}
