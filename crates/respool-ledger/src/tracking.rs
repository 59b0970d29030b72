//! Per-cycle exhaustion accumulator.
//!
//! Reset at the start of every allocation pass. The first claim that comes up
//! short on a resource fixes `available` for that resource; later claims that
//! hit the same shortage add their request to `requesting`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use respool_core::pool::Exhaustion;
use respool_core::quantity::Quantity;
use respool_core::resources::{ResourceList, ResourceName};

use crate::error::Shortfall;

/// A resource that queued a claim because an earlier claim already exhausted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocked {
    pub resource: ResourceName,
    pub requested: Quantity,
    pub queued: Quantity,
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {}: {} vs queued {}",
            self.resource, self.requested, self.queued
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExhaustionTracker {
    entries: BTreeMap<ResourceName, Exhaustion>,
}

impl ExhaustionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, shortfall: &Shortfall) {
        self.entries
            .entry(shortfall.resource.clone())
            .and_modify(|e| e.requesting += shortfall.requested)
            .or_insert(Exhaustion {
                available: shortfall.available,
                requesting: shortfall.requested,
            });
    }

    /// Requested resources that are already contended this cycle.
    pub fn blocked(&self, request: &ResourceList) -> Vec<Blocked> {
        request
            .iter()
            .filter_map(|(name, requested)| {
                self.entries.get(name).map(|e| Blocked {
                    resource: name.clone(),
                    requested,
                    queued: e.requesting,
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &ResourceName) -> Option<&Exhaustion> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &Exhaustion)> {
        self.entries.iter()
    }

    pub fn into_map(self) -> BTreeMap<ResourceName, Exhaustion> {
        self.entries
    }
}
