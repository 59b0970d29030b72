//! Controller driver: claim pass, then pool pass, on a resync loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use respool_core::meta::ObjectRef;

use crate::claim::{ClaimOutcome, ClaimReconciler};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::pool::{PoolReconciler, PoolReport};

#[derive(Debug, Default)]
pub struct PassReport {
    pub claims: Vec<(ObjectRef, ClaimOutcome)>,
    pub pools: Vec<PoolReport>,
    /// Reconciliations that failed; the next pass retries them.
    pub failures: Vec<(ObjectRef, ReconcileError)>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn pool(&self, name: &str) -> Option<&PoolReport> {
        self.pools.iter().find(|p| p.pool == name)
    }
}

#[derive(Clone)]
pub struct Controller {
    ctx: Context,
    claims: ClaimReconciler,
    pools: PoolReconciler,
}

impl Controller {
    pub fn new(ctx: Context) -> Self {
        Self {
            claims: ClaimReconciler::new(ctx.clone()),
            pools: PoolReconciler::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn pool_reconciler(&self) -> &PoolReconciler {
        &self.pools
    }

    pub fn claim_reconciler(&self) -> &ClaimReconciler {
        &self.claims
    }

    /// Reconcile every claim, then every pool. Tasks of one kind run
    /// concurrently, bounded by `max_parallel_pools`. Listing failures abort
    /// the pass; individual reconcile failures are collected.
    pub async fn run_once(&self) -> Result<PassReport> {
        let permits = Arc::new(Semaphore::new(self.ctx.config.max_parallel_pools));
        let mut report = PassReport::default();

        let mut claim_tasks = JoinSet::new();
        for claim in self.ctx.claims.list_claims(None).await? {
            let subject = claim.object_ref();
            let reconciler = self.claims.clone();
            let permits = Arc::clone(&permits);
            let (ns, name) = (claim.namespace().to_string(), claim.name().to_string());
            claim_tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => reconciler.reconcile(&ns, &name).await,
                    Err(e) => Err(e.into()),
                };
                (subject, result)
            });
        }
        while let Some(joined) = claim_tasks.join_next().await {
            match joined? {
                (subject, Ok(outcome)) => report.claims.push((subject, outcome)),
                (subject, Err(e)) => report.failures.push((subject, e)),
            }
        }
        report.claims.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));

        let mut pool_tasks = JoinSet::new();
        for pool in self.ctx.pools.list_pools().await? {
            let name = pool.name().to_string();
            let reconciler = self.pools.clone();
            let permits = Arc::clone(&permits);
            pool_tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => reconciler.reconcile(&name).await,
                    Err(e) => Err(e.into()),
                };
                (name, result)
            });
        }
        while let Some(joined) = pool_tasks.join_next().await {
            match joined? {
                (_, Ok(pool)) => report.pools.push(pool),
                (name, Err(e)) => report.failures.push((ObjectRef::pool(name), e)),
            }
        }
        report.pools.sort_by(|a, b| a.pool.cmp(&b.pool));

        for (subject, err) in &report.failures {
            error!(subject = %subject, error = %err, "reconcile failed");
        }
        Ok(report)
    }

    /// Run passes every `resync_interval_secs` until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let interval = Duration::from_secs(self.ctx.config.resync_interval_secs);
        tokio::pin!(shutdown);
        let mut pass = 0u64;
        loop {
            pass += 1;
            match self.run_once().await {
                Ok(report) => info!(
                    pass,
                    claims = report.claims.len(),
                    pools = report.pools.len(),
                    failures = report.failures.len(),
                    "pass complete"
                ),
                Err(e) => error!(pass, error = %e, "pass aborted"),
            }
            tokio::select! {
                _ = &mut shutdown => {
                    info!(pass, "shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
