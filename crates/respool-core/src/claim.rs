//! Claim: a namespaced request for named resources against one pool.

use serde::{Deserialize, Serialize};

use crate::condition::{find_condition, Condition, ConditionType, Reason};
use crate::id::Uid;
use crate::meta::{ObjectKind, ObjectMeta, ObjectRef};
use crate::order::ClaimKey;
use crate::pool::ClaimEntry;
use crate::resources::ResourceList;
use crate::RELEASE_ANNOTATION;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub resource_claims: ResourceList,
}

/// Binding target recorded on a claim once admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    pub name: String,
    pub uid: Uid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolRef>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
    #[serde(default)]
    pub status: ClaimStatus,
}

impl Claim {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        pool: impl Into<String>,
        resource_claims: ResourceList,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: ClaimSpec {
                pool: pool.into(),
                resource_claims,
            },
            status: ClaimStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> Uid {
        self.metadata.uid
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: ObjectKind::Claim,
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Priority key: `(creation, name, namespace)` ascending.
    pub fn order_key(&self) -> ClaimKey {
        ClaimKey::new(
            self.metadata.creation_timestamp,
            self.name(),
            self.namespace(),
        )
    }

    pub fn is_bound(&self) -> bool {
        self.status.pool.as_ref().map_or(false, |p| !p.uid.is_nil())
    }

    pub fn is_bound_to(&self, pool_uid: Uid) -> bool {
        self.status
            .pool
            .as_ref()
            .map_or(false, |p| !p.uid.is_nil() && p.uid == pool_uid)
    }

    pub fn is_marked_for_release(&self) -> bool {
        self.metadata.annotation_is_true(RELEASE_ANNOTATION)
    }

    /// Live and eligible to hold or request capacity.
    pub fn is_active(&self) -> bool {
        !self.metadata.is_deleting() && !self.is_marked_for_release()
    }

    pub fn entry(&self) -> ClaimEntry {
        ClaimEntry {
            name: self.metadata.name.clone(),
            uid: self.metadata.uid,
            claims: self.spec.resource_claims.clone(),
        }
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        find_condition(&self.status.conditions, type_)
    }

    pub fn bound_reason(&self) -> Option<Reason> {
        self.condition(ConditionType::Bound).map(|c| c.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_requires_non_nil_uid() {
        let mut c = Claim::new("ns", "c", "p", ResourceList::new());
        assert!(!c.is_bound());
        c.status.pool = Some(PoolRef {
            name: "p".into(),
            uid: Uid::nil(),
        });
        assert!(!c.is_bound());
        let uid = Uid::new();
        c.status.pool = Some(PoolRef {
            name: "p".into(),
            uid,
        });
        assert!(c.is_bound());
        assert!(c.is_bound_to(uid));
        assert!(!c.is_bound_to(Uid::new()));
    }

    #[test]
    fn release_annotation_deactivates() {
        let mut c = Claim::new("ns", "c", "p", ResourceList::new());
        assert!(c.is_active());
        c.metadata
            .annotations
            .insert(RELEASE_ANNOTATION.into(), "true".into());
        assert!(c.is_marked_for_release());
        assert!(!c.is_active());
    }
}
