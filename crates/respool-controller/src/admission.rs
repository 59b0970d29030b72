//! Claim admission checks.
//!
//! Pure validation against an already-fetched pool. Nothing is mutated here;
//! the claim reconciler turns a rejection into a `Failed` condition.

use respool_core::claim::Claim;
use respool_core::pool::Pool;

use crate::error::AdmissionError;

/// Validate, in order: a pool is named, it exists and is not deleting, it
/// selects the claim's namespace, and it budgets every requested resource.
pub fn admit<'p>(claim: &Claim, pool: Option<&'p Pool>) -> Result<&'p Pool, AdmissionError> {
    let wanted = claim.spec.pool.trim();
    if wanted.is_empty() {
        return Err(AdmissionError::MissingPool);
    }

    let pool = match pool {
        Some(p) if p.name() == wanted => p,
        _ => return Err(AdmissionError::PoolNotFound(wanted.to_string())),
    };
    if pool.metadata.is_deleting() {
        return Err(AdmissionError::PoolDeleting(wanted.to_string()));
    }

    if !pool.selects_namespace(claim.namespace()) {
        return Err(AdmissionError::NamespaceNotSelected {
            namespace: claim.namespace().to_string(),
            pool: wanted.to_string(),
        });
    }

    if let Some(missing) = pool
        .spec
        .hard
        .missing_names(&claim.spec.resource_claims)
        .first()
    {
        return Err(AdmissionError::UnknownResource {
            resource: missing.to_string(),
            pool: wanted.to_string(),
        });
    }

    Ok(pool)
}

/// Migration guard: a bound claim may not point at a different pool.
pub fn check_migration(claim: &Claim) -> Result<(), AdmissionError> {
    match &claim.status.pool {
        Some(bound) if claim.is_bound() && bound.name != claim.spec.pool => {
            Err(AdmissionError::PoolChangeWhileBound {
                bound: bound.name.clone(),
                requested: claim.spec.pool.clone(),
            })
        }
        _ => Ok(()),
    }
}
