//! Collaborator seams.
//!
//! Everything the controller needs from the outside world goes through these
//! traits, so the reconcilers can be driven by `MemoryStore` in tests and by a
//! real object store elsewhere. Writes are optimistic: an update carrying a
//! stale `resource_version` fails with `StoreError::Conflict`.

use async_trait::async_trait;

use respool_core::claim::Claim;
use respool_core::id::Uid;
use respool_core::meta::ObjectRef;
use respool_core::pool::Pool;
use respool_core::resources::ResourceList;
use respool_core::selector::LabelSelector;

use crate::error::Result;
use crate::notify::EventType;

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn get_pool(&self, name: &str) -> Result<Pool>;

    async fn list_pools(&self) -> Result<Vec<Pool>>;

    /// Write metadata and spec. Status is left as stored.
    async fn update_pool(&self, pool: &Pool) -> Result<Pool>;

    /// Write status only.
    async fn update_pool_status(&self, pool: &Pool) -> Result<Pool>;

    /// Marks the pool deleting while finalizers remain; removes it otherwise.
    async fn delete_pool(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Claim>;

    /// All claims, or only those of `namespace`.
    async fn list_claims(&self, namespace: Option<&str>) -> Result<Vec<Claim>>;

    /// Claims whose `status.pool.uid` is `uid`, served from a field index.
    async fn list_claims_by_pool_uid(&self, uid: Uid) -> Result<Vec<Claim>>;

    async fn update_claim(&self, claim: &Claim) -> Result<Claim>;

    async fn update_claim_status(&self, claim: &Claim) -> Result<Claim>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait NamespaceSelector: Send + Sync {
    /// De-duplicated, sorted union of the namespaces matched by any selector.
    /// An empty selector list matches nothing.
    async fn matching_namespaces(&self, selectors: &[LabelSelector]) -> Result<Vec<String>>;
}

/// Namespace-level quota objects that mirror a pool's admitted capacity.
#[async_trait]
pub trait MirrorSink: Send + Sync {
    async fn sync_mirror(&self, namespace: &str, pool: &str, hard: &ResourceList) -> Result<()>;

    /// Idempotent: a missing mirror is not an error.
    async fn delete_mirror(&self, namespace: &str, pool: &str) -> Result<()>;
}

/// Best-effort event recording. Must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, subject: &ObjectRef, kind: EventType, reason: &str, message: &str);
}
