//! Dense ledger: many item types, one tier each, a shared counter budget.
//!
//! Hyper-density cells use this. Equal distribution splits the budget into
//! N equal shares and caps the cell at N types.

use std::collections::BTreeMap;

use super::item::ItemId;
use super::ledger::{Extraction, Injection, Mode};
use super::policy::UpgradePolicy;
use super::saturating;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseLedger {
    amounts: BTreeMap<ItemId, u64>,
    /// Empty = accept anything.
    filter: Vec<ItemId>,
    capacity: u64,
    type_limit: usize,
    overflow_void: bool,
    distribution: u8,
}

impl DenseLedger {
    pub const DEFAULT_TYPE_LIMIT: usize = 63;

    pub fn new(capacity: u64, type_limit: usize) -> Self {
        Self {
            amounts: BTreeMap::new(),
            filter: Vec::new(),
            capacity,
            type_limit: type_limit.max(1),
            overflow_void: false,
            distribution: 0,
        }
    }

    /// Rebuild from persisted entries. Types past the limit are kept, but no
    /// new types are admitted until the count drops. Totals over capacity are
    /// clamped entry by entry in key order.
    pub fn restore(capacity: u64, type_limit: usize, entries: &[(ItemId, u64)]) -> Self {
        let mut ledger = Self::new(capacity, type_limit);
        let mut budget = capacity;
        for (id, amount) in entries {
            let kept = (*amount).min(budget);
            if kept > 0 {
                budget -= kept;
                let slot = ledger.amounts.entry(*id).or_insert(0);
                *slot = saturating::add(*slot, kept);
            }
        }
        ledger
    }

    pub fn apply_policy(&mut self, policy: &dyn UpgradePolicy) {
        self.overflow_void = policy.has_overflow_void();
        self.distribution = policy.equal_distribution();
    }

    pub fn set_filter(&mut self, filter: &[ItemId]) {
        self.filter = filter.to_vec();
        self.filter.sort_unstable();
        self.filter.dedup();
    }

    #[inline(always)]
    pub fn filter(&self) -> &[ItemId] {
        &self.filter
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stored(&self) -> u64 {
        self.amounts
            .values()
            .fold(0u64, |acc, v| saturating::add(acc, *v))
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.stored() >= self.capacity
    }

    #[inline(always)]
    pub fn type_count(&self) -> usize {
        self.amounts.len()
    }

    /// Types this cell may hold at once.
    pub fn effective_type_limit(&self) -> usize {
        if self.distribution > 0 {
            self.type_limit.min(self.distribution as usize)
        } else {
            self.type_limit
        }
    }

    /// Per-type ceiling. The whole budget unless equal distribution is on.
    pub fn per_type_capacity(&self) -> u64 {
        if self.distribution > 0 {
            saturating::equal_share(self.capacity, self.distribution as u64)
        } else {
            self.capacity
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ItemId, &u64)> {
        self.amounts.iter()
    }

    pub fn accepts(&self, id: &ItemId) -> bool {
        if !self.filter.is_empty() && self.filter.binary_search(id).is_err() {
            return false;
        }
        self.amounts.contains_key(id) || self.amounts.len() < self.effective_type_limit()
    }

    pub fn available(&self, id: &ItemId) -> u64 {
        self.amounts.get(id).copied().unwrap_or(0)
    }

    pub fn inject(&mut self, id: &ItemId, units: u64, mode: Mode) -> Injection {
        if !self.accepts(id) {
            return Injection::rejected_all(units);
        }
        if units == 0 {
            return Injection::default();
        }

        let current = self.available(id);
        let total_headroom = saturating::sub(self.capacity, self.stored());
        let type_headroom = saturating::sub(self.per_type_capacity(), current);
        let fits = units.min(total_headroom).min(type_headroom);
        let excess = units - fits;

        // Void only eats what the cell is already committed to: stored types,
        // or types named by the filter.
        let voids = self.overflow_void
            && (current > 0 || self.filter.binary_search(id).is_ok());
        let (voided, rejected) = if voids { (excess, 0) } else { (0, excess) };

        if mode.is_commit() && fits > 0 {
            let slot = self.amounts.entry(*id).or_insert(0);
            *slot = saturating::add(*slot, fits);
        }

        Injection {
            accepted: fits,
            voided,
            rejected,
            ..Injection::default()
        }
    }

    pub fn extract(&mut self, id: &ItemId, units: u64, mode: Mode) -> Extraction {
        let current = self.available(id);
        let extracted = units.min(current);
        if mode.is_commit() && extracted > 0 {
            if extracted == current {
                self.amounts.remove(id);
            } else if let Some(slot) = self.amounts.get_mut(id) {
                *slot -= extracted;
            }
        }
        Extraction {
            extracted,
            ..Extraction::default()
        }
    }
}
