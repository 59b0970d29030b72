//! Pool: the shared, budgeted resource container namespaces draw from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::id::Uid;
use crate::meta::{ObjectKind, ObjectMeta, ObjectRef, OwnerReference};
use crate::quantity::Quantity;
use crate::resources::{ResourceList, ResourceName};
use crate::selector::LabelSelector;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Strict FIFO: once a resource is contended, every lower-priority claim
    /// touching it waits.
    pub ordered_queue: bool,
    /// Drop the pool owner reference from claims when they are disassociated.
    pub delete_bound_resources: bool,
    /// Mirror every pool resource into member namespaces, zero when unclaimed.
    pub defaults_assign_zero: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default)]
    pub selectors: Vec<LabelSelector>,
    pub hard: ResourceList,
    #[serde(default, skip_serializing_if = "ResourceList::is_empty")]
    pub defaults: ResourceList,
    #[serde(default)]
    pub config: PoolConfig,
}

/// Arena-style reference to a bound claim. The pool never holds the claim
/// itself, only enough to find it again and to release what it admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEntry {
    pub name: String,
    pub uid: Uid,
    pub claims: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolAllocation {
    pub hard: ResourceList,
    pub claimed: ResourceList,
    pub available: ResourceList,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exhaustion {
    pub available: Quantity,
    pub requesting: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolStatus {
    pub allocation: PoolAllocation,
    pub namespaces: Vec<String>,
    pub namespace_size: usize,
    pub claims: BTreeMap<String, Vec<ClaimEntry>>,
    pub claim_size: usize,
    pub exhaustions: BTreeMap<ResourceName, Exhaustion>,
    pub conditions: Vec<Condition>,
}

impl PoolStatus {
    pub fn tracked_claims(&self) -> impl Iterator<Item = (&str, &ClaimEntry)> {
        self.claims
            .iter()
            .flat_map(|(ns, entries)| entries.iter().map(move |e| (ns.as_str(), e)))
    }

    pub fn is_tracked(&self, uid: Uid) -> bool {
        self.tracked_claims().any(|(_, e)| e.uid == uid)
    }

    /// Drop a tracked claim. Returns its entry when it was present.
    pub fn untrack(&mut self, namespace: &str, uid: Uid) -> Option<ClaimEntry> {
        let entries = self.claims.get_mut(namespace)?;
        let pos = entries.iter().position(|e| e.uid == uid)?;
        let entry = entries.remove(pos);
        if entries.is_empty() {
            self.claims.remove(namespace);
        }
        self.recount();
        Some(entry)
    }

    /// Re-derive the size counters from the collections.
    pub fn recount(&mut self) {
        self.claim_size = self.claims.values().map(Vec::len).sum();
        self.namespace_size = self.namespaces.len();
    }

    /// Sum of admitted requests tracked under `namespace`.
    pub fn namespace_claimed(&self, namespace: &str) -> ResourceList {
        let mut total = ResourceList::new();
        if let Some(entries) = self.claims.get(namespace) {
            for e in entries {
                total.add(&e.claims);
            }
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub metadata: ObjectMeta,
    pub spec: PoolSpec,
    #[serde(default)]
    pub status: PoolStatus,
}

impl Pool {
    pub fn new(name: impl Into<String>, hard: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: PoolSpec {
                hard,
                ..PoolSpec::default()
            },
            status: PoolStatus::default(),
        }
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.spec.selectors.push(selector);
        self
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.spec.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> Uid {
        self.metadata.uid
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: ObjectKind::Pool,
            namespace: None,
            name: self.metadata.name.clone(),
        }
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference::pool(self.metadata.name.clone(), self.metadata.uid)
    }

    pub fn selects_namespace(&self, namespace: &str) -> bool {
        self.status.namespaces.iter().any(|n| n == namespace)
    }

    /// Hard limits to mirror into `namespace`: defaults plus what the
    /// namespace has claimed, with zero fill when configured.
    pub fn mirror_limits(&self, namespace: &str) -> ResourceList {
        let mut limits = self.spec.defaults.clone();
        limits.add(&self.status.namespace_claimed(namespace));
        if self.spec.config.defaults_assign_zero {
            for name in self.spec.hard.names() {
                if !limits.contains(name) {
                    limits.insert(name.clone(), Quantity::ZERO);
                }
            }
        }
        limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, cpu: &str) -> ClaimEntry {
        ClaimEntry {
            name: name.into(),
            uid: Uid::new(),
            claims: ResourceList::parse([("cpu", cpu)]).unwrap(),
        }
    }

    #[test]
    fn untrack_drops_empty_namespaces() {
        let mut status = PoolStatus::default();
        let e = entry("a", "1");
        let uid = e.uid;
        status.claims.insert("ns".into(), vec![e]);
        status.recount();
        assert_eq!(status.claim_size, 1);
        assert!(status.untrack("ns", uid).is_some());
        assert!(status.claims.is_empty());
        assert_eq!(status.claim_size, 0);
        assert!(status.untrack("ns", uid).is_none());
    }

    #[test]
    fn mirror_limits_add_defaults_and_zero_fill() {
        let hard = ResourceList::parse([("cpu", "4"), ("memory", "8Gi")]).unwrap();
        let mut pool = Pool::new("p", hard).with_config(PoolConfig {
            defaults_assign_zero: true,
            ..PoolConfig::default()
        });
        pool.spec.defaults = ResourceList::parse([("cpu", "100m")]).unwrap();
        pool.status
            .claims
            .insert("ns".into(), vec![entry("a", "1"), entry("b", "500m")]);

        let limits = pool.mirror_limits("ns");
        assert_eq!(limits.to_string(), "cpu=1600m,memory=0");
        assert_eq!(pool.mirror_limits("other").to_string(), "cpu=100m,memory=0");
    }
}
