//! Ledger: hard budget, claimed totals, and the bound-claim arena of one pool.
//!
//! `available = hard - claimed` is derived on demand and never stored, so it
//! cannot drift. Recording a claim never checks capacity by itself; callers
//! either confirm an existing binding (`record`) or ask for admission
//! (`try_reserve`), which rejects instead of going negative.

use std::collections::BTreeMap;

use respool_core::id::Uid;
use respool_core::pool::{ClaimEntry, PoolAllocation, PoolStatus};
use respool_core::quantity::Quantity;
use respool_core::resources::{ResourceList, ResourceName};

use crate::error::{Error, Result, Shortfall};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    hard: ResourceList,
    claimed: ResourceList,
    namespaces: BTreeMap<String, ResourceList>,
    claims: BTreeMap<String, Vec<ClaimEntry>>,
}

impl Ledger {
    /// Empty ledger for `hard`; every budgeted resource starts at zero claimed.
    pub fn new(hard: ResourceList) -> Self {
        let claimed = hard.names().map(|n| (n.clone(), Quantity::ZERO)).collect();
        Self {
            hard,
            claimed,
            namespaces: BTreeMap::new(),
            claims: BTreeMap::new(),
        }
    }

    /// Rebuild from the previous status snapshot. Used by garbage collection,
    /// which only ever subtracts from what was recorded.
    pub fn from_status(hard: ResourceList, status: &PoolStatus) -> Self {
        let mut ledger = Self::new(hard);
        for (ns, entry) in status.tracked_claims() {
            ledger.record(ns, entry.clone());
        }
        ledger
    }

    pub fn hard(&self) -> &ResourceList {
        &self.hard
    }

    pub fn claimed(&self) -> &ResourceList {
        &self.claimed
    }

    pub fn claims(&self) -> &BTreeMap<String, Vec<ClaimEntry>> {
        &self.claims
    }

    pub fn namespace_claimed(&self, namespace: &str) -> ResourceList {
        self.namespaces.get(namespace).cloned().unwrap_or_default()
    }

    pub fn namespace_totals(&self) -> &BTreeMap<String, ResourceList> {
        &self.namespaces
    }

    pub fn claim_count(&self) -> usize {
        self.claims.values().map(Vec::len).sum()
    }

    /// `hard - claimed` per budgeted resource, clamped at zero.
    pub fn available(&self) -> ResourceList {
        self.hard.minus_clamped(&self.claimed)
    }

    /// Capacity left for `name`, or `None` when the pool does not budget it.
    pub fn claimable(&self, name: &ResourceName) -> Option<Quantity> {
        let hard = self.hard.get(name)?;
        Some(hard.saturating_sub(self.claimed.get_or_zero(name)))
    }

    pub fn is_recorded(&self, uid: Uid) -> bool {
        self.claims.values().flatten().any(|e| e.uid == uid)
    }

    /// Every requested resource that is unbudgeted, exhausted (zero left), or
    /// short of the request.
    pub fn shortfalls(&self, request: &ResourceList) -> Vec<Shortfall> {
        let mut out = Vec::new();
        for (name, requested) in request.iter() {
            let available = self.claimable(name);
            let short = match available {
                None => true,
                Some(avail) => avail.is_zero() || avail.cmp_quantity(requested).is_lt(),
            };
            if short {
                out.push(Shortfall {
                    resource: name.clone(),
                    requested,
                    available: available.unwrap_or(Quantity::ZERO),
                });
            }
        }
        out
    }

    /// Count `entry` against the ledger unconditionally. Used to re-confirm
    /// claims that are already bound.
    pub fn record(&mut self, namespace: &str, entry: ClaimEntry) {
        self.claimed.add(&entry.claims);
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .add(&entry.claims);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            namespace,
            claim = %entry.name,
            request = %entry.claims,
            claimed = %self.claimed,
            "ledger record"
        );

        self.claims
            .entry(namespace.to_string())
            .or_default()
            .push(entry);
    }

    /// Admit `entry` if every requested resource fits; otherwise leave the
    /// ledger untouched and report what was short.
    pub fn try_reserve(&mut self, namespace: &str, entry: ClaimEntry) -> Result<()> {
        if self.is_recorded(entry.uid) {
            return Err(Error::AlreadyRecorded {
                namespace: namespace.to_string(),
                uid: entry.uid.to_string(),
            });
        }
        let shortfalls = self.shortfalls(&entry.claims);
        if !shortfalls.is_empty() {
            return Err(Error::Insufficient(shortfalls));
        }
        self.record(namespace, entry);
        Ok(())
    }

    /// Remove a recorded claim and subtract what it held (clamped at zero).
    pub fn release(&mut self, namespace: &str, uid: Uid) -> Option<ClaimEntry> {
        let entries = self.claims.get_mut(namespace)?;
        let pos = entries.iter().position(|e| e.uid == uid)?;
        let entry = entries.remove(pos);
        if entries.is_empty() {
            self.claims.remove(namespace);
        }

        self.claimed.sub_clamped(&entry.claims);
        if let Some(total) = self.namespaces.get_mut(namespace) {
            total.sub_clamped(&entry.claims);
            if !self.claims.contains_key(namespace) {
                self.namespaces.remove(namespace);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            namespace,
            claim = %entry.name,
            claimed = %self.claimed,
            "ledger release"
        );

        Some(entry)
    }

    /// Resources where bound claims exceed the budget, which happens only when
    /// `hard` is lowered under existing bindings.
    pub fn overcommitted(&self) -> Vec<ResourceName> {
        self.claimed
            .iter()
            .filter(|(name, claimed)| *claimed > self.hard.get_or_zero(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn allocation(&self) -> PoolAllocation {
        PoolAllocation {
            hard: self.hard.clone(),
            claimed: self.claimed.clone(),
            available: self.available(),
        }
    }

    /// Write allocation, claim arena and counters into `status`.
    pub fn write_status(&self, status: &mut PoolStatus) {
        status.allocation = self.allocation();
        status.claims = self.claims.clone();
        status.recount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rl(pairs: &[(&str, &str)]) -> ResourceList {
        ResourceList::parse(pairs.iter().copied()).unwrap()
    }

    fn entry(name: &str, req: ResourceList) -> ClaimEntry {
        ClaimEntry {
            name: name.into(),
            uid: Uid::new(),
            claims: req,
        }
    }

    #[test]
    fn reserve_until_exhausted() {
        let mut l = Ledger::new(rl(&[("cpu", "1")]));
        l.try_reserve("ns", entry("a", rl(&[("cpu", "600m")]))).unwrap();
        let err = l
            .try_reserve("ns", entry("b", rl(&[("cpu", "600m")])))
            .unwrap_err();
        match err {
            Error::Insufficient(s) => {
                assert_eq!(s.len(), 1);
                assert_eq!(s[0].available, Quantity::parse("400m").unwrap());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(l.claimed().get_or_zero(&"cpu".into()), Quantity::parse("600m").unwrap());
        assert_eq!(l.available().get_or_zero(&"cpu".into()), Quantity::parse("400m").unwrap());
    }

    #[test]
    fn zero_available_is_short_even_for_zero_request() {
        let l = Ledger::new(rl(&[("cpu", "0")]));
        assert_eq!(l.shortfalls(&rl(&[("cpu", "0")])).len(), 1);
    }

    #[test]
    fn unbudgeted_resource_is_short() {
        let l = Ledger::new(rl(&[("cpu", "1")]));
        let s = l.shortfalls(&rl(&[("gpu", "1")]));
        assert_eq!(s[0].available, Quantity::ZERO);
    }

    #[test]
    fn release_subtracts_and_forgets_namespace() {
        let mut l = Ledger::new(rl(&[("cpu", "2")]));
        let e = entry("a", rl(&[("cpu", "1")]));
        let uid = e.uid;
        l.try_reserve("ns", e).unwrap();
        assert!(l.release("ns", uid).is_some());
        assert!(l.release("ns", uid).is_none());
        assert!(l.claimed().get_or_zero(&"cpu".into()).is_zero());
        assert!(l.namespace_totals().is_empty());
        assert_eq!(l.claim_count(), 0);
    }

    #[test]
    fn record_can_overcommit_and_reports_it() {
        let mut l = Ledger::new(rl(&[("cpu", "1")]));
        l.record("ns", entry("a", rl(&[("cpu", "2")])));
        assert_eq!(l.overcommitted(), vec![ResourceName::from("cpu")]);
        assert!(l.available().get_or_zero(&"cpu".into()).is_zero());
    }

    #[test]
    fn status_round_trip_preserves_totals() {
        let mut l = Ledger::new(rl(&[("cpu", "4")]));
        l.record("a", entry("x", rl(&[("cpu", "1")])));
        l.record("b", entry("y", rl(&[("cpu", "2")])));
        let mut status = PoolStatus::default();
        l.write_status(&mut status);
        assert_eq!(status.claim_size, 2);

        let rebuilt = Ledger::from_status(rl(&[("cpu", "4")]), &status);
        assert_eq!(rebuilt.claimed(), l.claimed());
        assert_eq!(rebuilt.namespace_claimed("b"), rl(&[("cpu", "2")]));
    }
}
