//! YAML world documents.
//!
//! A world is everything a controller pass needs to see: namespaces with their
//! labels, pools, claims and (on output) the namespace mirrors. The optional
//! `config` block carries controller settings that sit between the
//! environment and command-line flags in precedence.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use respool_core::claim::Claim;
use respool_core::config::ConfigOverrides;
use respool_core::pool::Pool;
use respool_core::resources::ResourceList;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorDef {
    pub namespace: String,
    pub pool: String,
    pub hard: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct World {
    #[serde(skip_serializing_if = "is_default")]
    pub config: ConfigOverrides,
    pub namespaces: Vec<NamespaceDef>,
    pub pools: Vec<Pool>,
    pub claims: Vec<Claim>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<MirrorDef>,
}

fn is_default(c: &ConfigOverrides) -> bool {
    *c == ConfigOverrides::default()
}

impl World {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let world: World = serde_yaml::from_str(s)?;
        world.validate()?;
        Ok(world)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Structural checks only; admission rules are the controller's job.
    pub fn validate(&self) -> Result<()> {
        let mut pools = BTreeSet::new();
        for pool in &self.pools {
            if !pools.insert(pool.metadata.name.as_str()) {
                return Err(StoreError::Invalid(format!(
                    "duplicate pool '{}'",
                    pool.metadata.name
                )));
            }
            for selector in &pool.spec.selectors {
                selector.validate()?;
            }
        }

        let mut claims = BTreeSet::new();
        for claim in &self.claims {
            let Some(ns) = claim.metadata.namespace.as_deref() else {
                return Err(StoreError::Invalid(format!(
                    "claim '{}' has no namespace",
                    claim.metadata.name
                )));
            };
            if !claims.insert((ns, claim.metadata.name.as_str())) {
                return Err(StoreError::Invalid(format!(
                    "duplicate claim '{}/{}'",
                    ns, claim.metadata.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"
config:
  conflictMaxRetries: 2
namespaces:
  - name: team-a
    labels:
      tier: gold
pools:
  - metadata:
      name: gold
    spec:
      selectors:
        - matchLabels:
            tier: gold
      hard:
        cpu: "4"
      config:
        orderedQueue: true
claims:
  - metadata:
      name: web
      namespace: team-a
      creationTimestamp: 2024-01-01T00:00:00Z
    spec:
      pool: gold
      resourceClaims:
        cpu: 1500m
"#;

    #[test]
    fn parses_camel_case_world() {
        let world = World::from_yaml_str(WORLD).unwrap();
        assert_eq!(world.config.conflict_max_retries, Some(2));
        assert!(world.pools[0].spec.config.ordered_queue);
        assert_eq!(world.claims[0].namespace(), "team-a");
        assert_eq!(
            world.claims[0].spec.resource_claims.to_string(),
            "cpu=1500m"
        );
    }

    #[test]
    fn claims_need_a_namespace() {
        let yaml = "claims:\n  - metadata:\n      name: x\n    spec:\n      pool: p\n";
        assert!(matches!(
            World::from_yaml_str(yaml),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn yaml_output_parses_back() {
        let world = World::from_yaml_str(WORLD).unwrap();
        let again = World::from_yaml_str(&world.to_yaml().unwrap()).unwrap();
        assert_eq!(again.pools[0].spec, world.pools[0].spec);
        assert_eq!(again.claims[0].metadata.creation_timestamp, world.claims[0].metadata.creation_timestamp);
    }
}
