//! Named resource vectors.
//!
//! `ResourceList` is an ordered map so every iteration (allocation messages,
//! exhaustion maps, hashing) is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::quantity::Quantity;

/// Resource name such as `requests.cpu` or `limits.memory`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<ResourceName, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, quantity-string)` pairs. Mostly for tests and tooling.
    pub fn parse<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = Self::new();
        for (name, qty) in pairs {
            out.insert(name, Quantity::parse(qty)?);
        }
        Ok(out)
    }

    /// Parse the compact `cpu=1500m,memory=1Gi` form used on the command line.
    pub fn parse_compact(s: &str) -> Result<Self> {
        let mut out = Self::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, qty) = part.split_once('=').ok_or_else(|| crate::error::Error::Quantity {
                input: part.to_string(),
                reason: "expected name=quantity".into(),
            })?;
            out.insert(name.trim(), Quantity::parse(qty)?);
        }
        Ok(out)
    }

    pub fn insert(&mut self, name: impl Into<ResourceName>, qty: Quantity) {
        self.0.insert(name.into(), qty);
    }

    pub fn get(&self, name: &ResourceName) -> Option<Quantity> {
        self.0.get(name).copied()
    }

    /// Quantity for `name`, or zero when absent.
    pub fn get_or_zero(&self, name: &ResourceName) -> Quantity {
        self.get(name).unwrap_or(Quantity::ZERO)
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &ResourceName) -> Option<Quantity> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, Quantity)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &ResourceName> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every entry is zero (an empty list is all-zero too).
    pub fn is_all_zero(&self) -> bool {
        self.0.values().all(|q| q.is_zero())
    }

    /// Element-wise `self += other`, adding keys that are missing.
    pub fn add(&mut self, other: &ResourceList) {
        for (name, qty) in other.iter() {
            *self.0.entry(name.clone()).or_default() += qty;
        }
    }

    /// Element-wise `self -= other` clamped at zero. Keys missing from `self`
    /// are ignored: usage can only shrink through this path.
    pub fn sub_clamped(&mut self, other: &ResourceList) {
        for (name, qty) in other.iter() {
            if let Some(cur) = self.0.get_mut(name) {
                *cur = cur.saturating_sub(qty);
            }
        }
    }

    /// `self - other` for every key of `self`, clamped at zero.
    pub fn minus_clamped(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (name, cur) in out.0.iter_mut() {
            *cur = cur.saturating_sub(other.get_or_zero(name));
        }
        out
    }

    /// Keys of `other` that are not present in `self`.
    pub fn missing_names<'a>(&self, other: &'a ResourceList) -> Vec<&'a ResourceName> {
        other.names().filter(|n| !self.contains(n)).collect()
    }
}

impl FromIterator<(ResourceName, Quantity)> for ResourceList {
    fn from_iter<T: IntoIterator<Item = (ResourceName, Quantity)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, qty) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{name}={qty}")?;
            first = false;
        }
        Ok(())
    }
}
