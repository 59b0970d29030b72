//! Object metadata shared by pools and claims.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ResourceVersion, Uid};

/// Kinds that may appear as an owner. Closed on purpose: claims are only ever
/// owned by pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    Pool,
}

/// Kind-qualified reference used when talking about an object (events, logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Pool,
    Claim,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn claim(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Claim,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn pool(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Pool,
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{:?}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{:?}/{}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: OwnerKind,
    pub name: String,
    pub uid: Uid,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn pool(name: impl Into<String>, uid: Uid) -> Self {
        Self {
            kind: OwnerKind::Pool,
            name: name.into(),
            uid,
            controller: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: Uid,
    #[serde(default)]
    pub resource_version: ResourceVersion,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            uid: Uid::new(),
            resource_version: ResourceVersion::default(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
            owner_references: Vec::new(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut meta = Self::new(name);
        meta.namespace = Some(namespace.into());
        meta
    }

    pub fn with_creation(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = ts;
        self
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true when the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true when the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    pub fn annotation_is_true(&self, key: &str) -> bool {
        self.annotations
            .get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn pool_owner(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|o| o.kind == OwnerKind::Pool)
    }

    /// Replace every pool owner reference with `owner`. Returns true if the
    /// owner set changed.
    pub fn set_pool_owner(&mut self, owner: OwnerReference) -> bool {
        let mut pools = self
            .owner_references
            .iter()
            .filter(|o| o.kind == OwnerKind::Pool);
        if let (Some(only), None) = (pools.next(), pools.next()) {
            if *only == owner {
                return false;
            }
        }
        self.owner_references.retain(|o| o.kind != OwnerKind::Pool);
        self.owner_references.push(owner);
        true
    }

    /// Drop pool owner references matching `uid`, or all of them when `uid`
    /// is `None`. Returns true when something was removed.
    pub fn remove_pool_owner(&mut self, uid: Option<Uid>) -> bool {
        let before = self.owner_references.len();
        self.owner_references
            .retain(|o| o.kind != OwnerKind::Pool || uid.map_or(false, |u| o.uid != u));
        before != self.owner_references.len()
    }
}
