//! Claim reconciler: admission, migration guard, and failure reporting.
//!
//! Binding itself happens in the pool cycle. This side only decides whether a
//! claim is eligible for its pool and says so on the claim.

use tracing::{debug, info};

use respool_core::claim::Claim;
use respool_core::condition::{set_condition, Condition, ConditionType, Reason};
use respool_core::id::Uid;
use respool_store::{retry_on_conflict, StoreError};

use crate::admission::{admit, check_migration};
use crate::context::Context;
use crate::error::{AdmissionError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Eligible for `pool`; the pool cycle decides bind / queue / exhaust.
    Admitted { pool: String },
    /// Already bound to `pool`.
    Bound { pool: String },
    Rejected { reason: AdmissionError },
    /// Deleting or marked for release; `pool` (if any) will disassociate it.
    Releasing { pool: Option<String> },
    Missing,
}

impl ClaimOutcome {
    /// Pool whose next cycle this outcome affects.
    pub fn pool(&self) -> Option<&str> {
        match self {
            ClaimOutcome::Admitted { pool } | ClaimOutcome::Bound { pool } => Some(pool),
            ClaimOutcome::Releasing { pool } => pool.as_deref(),
            ClaimOutcome::Rejected { .. } | ClaimOutcome::Missing => None,
        }
    }
}

#[derive(Clone)]
pub struct ClaimReconciler {
    ctx: Context,
}

impl ClaimReconciler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ClaimOutcome> {
        let claim = match self.ctx.claims.get_claim(namespace, name).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => return Ok(ClaimOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        if !claim.is_active() {
            let pool = claim
                .status
                .pool
                .as_ref()
                .map(|p| p.name.clone())
                .or_else(|| (!claim.spec.pool.is_empty()).then(|| claim.spec.pool.clone()));
            debug!(claim = %claim.object_ref(), "claim inactive, left to pool cleanup");
            return Ok(ClaimOutcome::Releasing { pool });
        }

        if let Err(reason) = check_migration(&claim) {
            info!(claim = %claim.object_ref(), %reason, "pool migration refused");
            let cond = Condition::new(ConditionType::Ready, false, Reason::Failed, reason.to_string());
            self.write_conditions(&claim, vec![cond]).await?;
            return Ok(ClaimOutcome::Rejected { reason });
        }

        if let Some(bound) = claim.status.pool.as_ref().filter(|_| claim.is_bound()) {
            self.mark_ready(&claim).await?;
            return Ok(ClaimOutcome::Bound {
                pool: bound.name.clone(),
            });
        }

        // Unbound and retargeted: an owner left over from the old pool is stale.
        self.drop_stale_owner(&claim).await?;

        let mut pool = if claim.spec.pool.trim().is_empty() {
            None
        } else {
            match self.ctx.pools.get_pool(claim.spec.pool.trim()).await {
                Ok(p) => Some(p),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            }
        };
        // Scope is checked against the live selection, not the last status.
        if let Some(p) = pool.as_mut().filter(|p| !p.metadata.is_deleting()) {
            p.status.namespaces = self
                .ctx
                .namespaces
                .matching_namespaces(&p.spec.selectors)
                .await?;
        }

        match admit(&claim, pool.as_ref()) {
            Ok(pool) => {
                debug!(claim = %claim.object_ref(), pool = pool.name(), "claim admitted");
                Ok(ClaimOutcome::Admitted {
                    pool: pool.name().to_string(),
                })
            }
            Err(reason) => {
                info!(claim = %claim.object_ref(), %reason, "claim rejected");
                let conds = [ConditionType::Bound, ConditionType::Ready]
                    .into_iter()
                    .map(|t| Condition::new(t, false, Reason::Failed, reason.to_string()))
                    .collect();
                self.write_conditions(&claim, conds).await?;
                Ok(ClaimOutcome::Rejected { reason })
            }
        }
    }

    async fn mark_ready(&self, claim: &Claim) -> Result<()> {
        let cond = Condition::new(ConditionType::Ready, true, Reason::Succeeded, "");
        self.write_conditions(claim, vec![cond]).await
    }

    /// Upsert conditions with a fresh read per attempt.
    async fn write_conditions(&self, claim: &Claim, conds: Vec<Condition>) -> Result<()> {
        let claims = &self.ctx.claims;
        let (ns, name, uid) = (claim.namespace(), claim.name(), claim.uid());
        let conds = &conds;
        retry_on_conflict(&self.ctx.retry, "claim condition", move || async move {
            let mut latest = claims.get_claim(ns, name).await?;
            if latest.uid() != uid {
                return Ok(());
            }
            let mut changed = false;
            for cond in conds {
                changed |= set_condition(&mut latest.status.conditions, cond.clone());
            }
            if changed {
                claims.update_claim_status(&latest).await?;
            }
            Ok::<(), StoreError>(())
        })
        .await?;
        Ok(())
    }

    async fn drop_stale_owner(&self, claim: &Claim) -> Result<()> {
        let Some(owner) = claim
            .metadata
            .pool_owner()
            .filter(|o| o.name != claim.spec.pool)
        else {
            return Ok(());
        };
        let stale: Uid = owner.uid;
        info!(
            claim = %claim.object_ref(),
            owner = %owner.name,
            "removing stale pool owner from unbound claim"
        );

        let claims = &self.ctx.claims;
        let (ns, name, uid) = (claim.namespace(), claim.name(), claim.uid());
        retry_on_conflict(&self.ctx.retry, "claim owner", move || async move {
            let mut latest = claims.get_claim(ns, name).await?;
            if latest.uid() != uid || latest.is_bound() {
                return Ok(());
            }
            if latest.metadata.remove_pool_owner(Some(stale)) {
                claims.update_claim(&latest).await?;
            }
            Ok::<(), StoreError>(())
        })
        .await?;
        Ok(())
    }
}
