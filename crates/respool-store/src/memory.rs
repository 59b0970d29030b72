//! In-process implementation of every collaborator trait.
//!
//! Behaves like a small object store: versions are bumped on every write,
//! stale writes conflict, deletes honour finalizers, and bound claims are
//! indexed by pool uid. Fault hooks (injected conflicts, failing mirrors, a
//! global outage switch) exist so reconcilers can be exercised against
//! partial failure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use respool_core::claim::Claim;
use respool_core::id::{ResourceVersion, Uid};
use respool_core::meta::{ObjectKind, ObjectMeta, ObjectRef};
use respool_core::pool::Pool;
use respool_core::resources::ResourceList;
use respool_core::selector::LabelSelector;

use crate::error::{Result, StoreError};
use crate::notify::{Event, EventType};
use crate::traits::{ClaimStore, MirrorSink, NamespaceSelector, NotificationSink, PoolStore};
use crate::world::{MirrorDef, NamespaceDef, World};

type NsName = (String, String);

fn pool_ref(name: &str) -> ObjectRef {
    ObjectRef {
        kind: ObjectKind::Pool,
        namespace: None,
        name: name.to_string(),
    }
}

fn claim_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef {
        kind: ObjectKind::Claim,
        namespace: Some(namespace.to_string()),
        name: name.to_string(),
    }
}

fn bound_uid(claim: &Claim) -> Option<Uid> {
    claim
        .status
        .pool
        .as_ref()
        .map(|p| p.uid)
        .filter(|uid| !uid.is_nil())
}

fn check_version(
    object: &ObjectRef,
    stored: ResourceVersion,
    given: ResourceVersion,
) -> Result<()> {
    if stored == given {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            object: object.clone(),
            expected: given,
            found: stored,
        })
    }
}

/// Carry identity fields over from the stored copy; callers cannot change them.
fn merge_meta(stored: &ObjectMeta, incoming: &ObjectMeta) -> ObjectMeta {
    let mut meta = incoming.clone();
    meta.uid = stored.uid;
    meta.creation_timestamp = stored.creation_timestamp;
    meta.deletion_timestamp = stored.deletion_timestamp;
    meta.resource_version = stored.resource_version.next();
    meta
}

#[derive(Debug, Default)]
struct Faults {
    conflicts: BTreeMap<String, usize>,
    failing_mirrors: BTreeSet<String>,
    unavailable: bool,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    pools: BTreeMap<String, Pool>,
    claims: BTreeMap<NsName, Claim>,
    by_pool_uid: BTreeMap<Uid, BTreeSet<NsName>>,
    mirrors: BTreeMap<NsName, ResourceList>,
    faults: Faults,
}

impl State {
    fn ensure_available(&self) -> Result<()> {
        if self.faults.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn injected_conflict(&mut self, object: &ObjectRef, given: ResourceVersion) -> Result<()> {
        let key = object.to_string();
        if let Some(left) = self.faults.conflicts.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Conflict {
                    object: object.clone(),
                    expected: given,
                    found: given.next(),
                });
            }
        }
        Ok(())
    }

    fn reindex(&mut self, key: &NsName, old: Option<Uid>, new: Option<Uid>) {
        if old == new {
            return;
        }
        if let Some(uid) = old {
            if let Some(set) = self.by_pool_uid.get_mut(&uid) {
                set.remove(key);
                if set.is_empty() {
                    self.by_pool_uid.remove(&uid);
                }
            }
        }
        if let Some(uid) = new {
            self.by_pool_uid.entry(uid).or_default().insert(key.clone());
        }
    }

    fn insert_pool(&mut self, mut pool: Pool) -> Result<Pool> {
        if pool.metadata.namespace.is_some() {
            return Err(StoreError::Invalid(format!(
                "pool '{}' must not be namespaced",
                pool.metadata.name
            )));
        }
        if self.pools.contains_key(&pool.metadata.name) {
            return Err(StoreError::AlreadyExists(pool_ref(&pool.metadata.name)));
        }
        for selector in &pool.spec.selectors {
            selector.validate()?;
        }
        if pool.metadata.uid.is_nil() {
            pool.metadata.uid = Uid::new();
        }
        pool.metadata.resource_version = ResourceVersion::new(1);
        self.pools.insert(pool.metadata.name.clone(), pool.clone());
        Ok(pool)
    }

    fn insert_claim(&mut self, mut claim: Claim) -> Result<Claim> {
        let Some(namespace) = claim.metadata.namespace.clone() else {
            return Err(StoreError::Invalid(format!(
                "claim '{}' has no namespace",
                claim.metadata.name
            )));
        };
        let key = (namespace.clone(), claim.metadata.name.clone());
        if self.claims.contains_key(&key) {
            return Err(StoreError::AlreadyExists(claim_ref(&namespace, &key.1)));
        }
        if claim.metadata.uid.is_nil() {
            claim.metadata.uid = Uid::new();
        }
        claim.metadata.resource_version = ResourceVersion::new(1);
        self.reindex(&key, None, bound_uid(&claim));
        self.claims.insert(key, claim.clone());
        Ok(claim)
    }

    fn remove_claim(&mut self, key: &NsName) -> Option<Claim> {
        let claim = self.claims.remove(key)?;
        self.reindex(key, bound_uid(&claim), None);
        Some(claim)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding everything the world describes.
    pub fn from_world(world: &World) -> Result<Self> {
        world.validate()?;
        let mut state = State::default();
        for ns in &world.namespaces {
            state.namespaces.insert(ns.name.clone(), ns.labels.clone());
        }
        for pool in &world.pools {
            state.insert_pool(pool.clone())?;
        }
        for claim in &world.claims {
            if let Some(ns) = &claim.metadata.namespace {
                state.namespaces.entry(ns.clone()).or_default();
            }
            state.insert_claim(claim.clone())?;
        }
        for m in &world.mirrors {
            state
                .mirrors
                .insert((m.namespace.clone(), m.pool.clone()), m.hard.clone());
        }
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            events: Arc::default(),
        })
    }

    /// Current contents as a world document. Config is left empty.
    pub async fn snapshot(&self) -> World {
        let st = self.state.read().await;
        World {
            config: Default::default(),
            namespaces: st
                .namespaces
                .iter()
                .map(|(name, labels)| NamespaceDef {
                    name: name.clone(),
                    labels: labels.clone(),
                })
                .collect(),
            pools: st.pools.values().cloned().collect(),
            claims: st.claims.values().cloned().collect(),
            mirrors: st
                .mirrors
                .iter()
                .map(|((namespace, pool), hard)| MirrorDef {
                    namespace: namespace.clone(),
                    pool: pool.clone(),
                    hard: hard.clone(),
                })
                .collect(),
        }
    }

    /// Create or relabel a namespace.
    pub async fn put_namespace(&self, name: &str, labels: BTreeMap<String, String>) {
        self.state
            .write()
            .await
            .namespaces
            .insert(name.to_string(), labels);
    }

    pub async fn remove_namespace(&self, name: &str) {
        self.state.write().await.namespaces.remove(name);
    }

    pub async fn create_pool(&self, pool: Pool) -> Result<Pool> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        st.insert_pool(pool)
    }

    pub async fn create_claim(&self, claim: Claim) -> Result<Claim> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        st.insert_claim(claim)
    }

    pub async fn mirror(&self, namespace: &str, pool: &str) -> Option<ResourceList> {
        self.state
            .read()
            .await
            .mirrors
            .get(&(namespace.to_string(), pool.to_string()))
            .cloned()
    }

    pub async fn mirror_namespaces(&self, pool: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .mirrors
            .keys()
            .filter(|(_, p)| p == pool)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// The next `times` writes to `object` fail with a conflict.
    pub async fn inject_conflicts(&self, object: &ObjectRef, times: usize) {
        self.state
            .write()
            .await
            .faults
            .conflicts
            .insert(object.to_string(), times);
    }

    pub async fn fail_mirrors_in(&self, namespace: &str) {
        self.state
            .write()
            .await
            .faults
            .failing_mirrors
            .insert(namespace.to_string());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.faults.unavailable = unavailable;
    }

    pub async fn clear_faults(&self) {
        self.state.write().await.faults = Faults::default();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn get_pool(&self, name: &str) -> Result<Pool> {
        let st = self.state.read().await;
        st.ensure_available()?;
        st.pools
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(pool_ref(name)))
    }

    async fn list_pools(&self) -> Result<Vec<Pool>> {
        let st = self.state.read().await;
        st.ensure_available()?;
        Ok(st.pools.values().cloned().collect())
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let name = pool.metadata.name.clone();
        let object = pool_ref(&name);
        st.injected_conflict(&object, pool.metadata.resource_version)?;

        let stored = st
            .pools
            .get_mut(&name)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        check_version(
            &object,
            stored.metadata.resource_version,
            pool.metadata.resource_version,
        )?;
        stored.metadata = merge_meta(&stored.metadata, &pool.metadata);
        stored.spec = pool.spec.clone();
        let out = stored.clone();

        if out.metadata.is_deleting() && out.metadata.finalizers.is_empty() {
            st.pools.remove(&name);
            tracing::debug!(pool = %name, "pool removed after last finalizer");
        }
        Ok(out)
    }

    async fn update_pool_status(&self, pool: &Pool) -> Result<Pool> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let object = pool_ref(&pool.metadata.name);
        st.injected_conflict(&object, pool.metadata.resource_version)?;

        let stored = st
            .pools
            .get_mut(&pool.metadata.name)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        check_version(
            &object,
            stored.metadata.resource_version,
            pool.metadata.resource_version,
        )?;
        stored.status = pool.status.clone();
        stored.metadata.resource_version = stored.metadata.resource_version.next();
        Ok(stored.clone())
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let stored = st
            .pools
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(pool_ref(name)))?;
        if stored.metadata.finalizers.is_empty() {
            st.pools.remove(name);
        } else if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version = stored.metadata.resource_version.next();
        }
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Claim> {
        let st = self.state.read().await;
        st.ensure_available()?;
        st.claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(claim_ref(namespace, name)))
    }

    async fn list_claims(&self, namespace: Option<&str>) -> Result<Vec<Claim>> {
        let st = self.state.read().await;
        st.ensure_available()?;
        Ok(st
            .claims
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |want| ns == want))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn list_claims_by_pool_uid(&self, uid: Uid) -> Result<Vec<Claim>> {
        let st = self.state.read().await;
        st.ensure_available()?;
        Ok(st
            .by_pool_uid
            .get(&uid)
            .into_iter()
            .flatten()
            .filter_map(|key| st.claims.get(key).cloned())
            .collect())
    }

    async fn update_claim(&self, claim: &Claim) -> Result<Claim> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let key = (claim.namespace().to_string(), claim.name().to_string());
        let object = claim_ref(&key.0, &key.1);
        st.injected_conflict(&object, claim.metadata.resource_version)?;

        let stored = st
            .claims
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        check_version(
            &object,
            stored.metadata.resource_version,
            claim.metadata.resource_version,
        )?;
        stored.metadata = merge_meta(&stored.metadata, &claim.metadata);
        stored.spec = claim.spec.clone();
        let out = stored.clone();

        if out.metadata.is_deleting() && out.metadata.finalizers.is_empty() {
            st.remove_claim(&key);
        }
        Ok(out)
    }

    async fn update_claim_status(&self, claim: &Claim) -> Result<Claim> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let key = (claim.namespace().to_string(), claim.name().to_string());
        let object = claim_ref(&key.0, &key.1);
        st.injected_conflict(&object, claim.metadata.resource_version)?;

        let stored = st
            .claims
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        check_version(
            &object,
            stored.metadata.resource_version,
            claim.metadata.resource_version,
        )?;
        let old = bound_uid(stored);
        stored.status = claim.status.clone();
        stored.metadata.resource_version = stored.metadata.resource_version.next();
        let out = stored.clone();
        st.reindex(&key, old, bound_uid(&out));
        Ok(out)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        let key = (namespace.to_string(), name.to_string());
        let stored = st
            .claims
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(claim_ref(namespace, name)))?;
        if stored.metadata.finalizers.is_empty() {
            st.remove_claim(&key);
        } else if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version = stored.metadata.resource_version.next();
        }
        Ok(())
    }
}

#[async_trait]
impl NamespaceSelector for MemoryStore {
    async fn matching_namespaces(&self, selectors: &[LabelSelector]) -> Result<Vec<String>> {
        for selector in selectors {
            selector.validate()?;
        }
        let st = self.state.read().await;
        st.ensure_available()?;
        if selectors.is_empty() {
            return Ok(Vec::new());
        }
        Ok(st
            .namespaces
            .iter()
            .filter(|(_, labels)| selectors.iter().any(|s| s.matches(labels)))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[async_trait]
impl MirrorSink for MemoryStore {
    async fn sync_mirror(&self, namespace: &str, pool: &str, hard: &ResourceList) -> Result<()> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        if st.faults.failing_mirrors.contains(namespace) {
            return Err(StoreError::Mirror {
                namespace: namespace.to_string(),
                reason: "injected failure".into(),
            });
        }
        st.mirrors
            .insert((namespace.to_string(), pool.to_string()), hard.clone());
        Ok(())
    }

    async fn delete_mirror(&self, namespace: &str, pool: &str) -> Result<()> {
        let mut st = self.state.write().await;
        st.ensure_available()?;
        st.mirrors
            .remove(&(namespace.to_string(), pool.to_string()));
        Ok(())
    }
}

impl NotificationSink for MemoryStore {
    fn notify(&self, subject: &ObjectRef, kind: EventType, reason: &str, message: &str) {
        tracing::debug!(subject = %subject, ?kind, reason, message, "event recorded");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Event {
                subject: subject.clone(),
                kind,
                reason: reason.to_string(),
                message: message.to_string(),
            });
    }
}
