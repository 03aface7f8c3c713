//! Tiered ledger. One base-unit counter, every tier derived from it.
//!
//! `Unpartitioned → Partitioned(A)` on the first partition.
//! `Partitioned(A) → Partitioned(B)` only while the counter is zero.
//! There is no way back to `Unpartitioned`.
//!
//! A load that drops a damaged chain but keeps the counter leaves the ledger
//! orphaned: units held, no chain. The counter's [`CounterIdentity`] is kept
//! alongside, and only a chain over the same base may adopt those units.

use arrayvec::ArrayVec;

use super::chain::{CompressionChain, MAX_CHAIN_TIERS};
use super::item::ItemId;
use super::policy::{effective_depth, UpgradePolicy};
use super::resolver::{ChainResolver, RecipeOracle};
use super::saturating;

/// Dry run or the real thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Report what would happen. Touch nothing.
    Simulate = 0,
    /// Apply.
    Commit = 1,
}

impl Mode {
    #[inline(always)]
    pub const fn is_commit(self) -> bool {
        matches!(self, Mode::Commit)
    }
}

/// Partition change refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PartitionDenied {
    /// Counter is non-zero and the partition would change the chain.
    #[error("cell still holds {stored} base units")]
    NotEmpty { stored: u64 },
    /// Orphaned counter is denominated in another base item.
    #[error("counter holds {expected} base units, chain base is {found}")]
    ForeignBase { expected: ItemId, found: ItemId },
}

/// Items a counter is denominated in: its chain's main and base tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterIdentity {
    pub main: ItemId,
    pub base: ItemId,
}

impl CounterIdentity {
    pub fn of(chain: &CompressionChain) -> Self {
        Self {
            main: chain.main().id,
            base: chain.base().id,
        }
    }
}

/// Displayed quantity of one tier before and after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierChange {
    pub id: ItemId,
    pub before: u64,
    pub after: u64,
}

impl TierChange {
    #[inline(always)]
    pub const fn delta(&self) -> i128 {
        self.after as i128 - self.before as i128
    }
}

/// Tiers other than the operated one whose displayed count moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossTierDelta {
    changes: ArrayVec<TierChange, MAX_CHAIN_TIERS>,
}

impl CrossTierDelta {
    pub const fn new() -> Self {
        Self {
            changes: ArrayVec::new_const(),
        }
    }

    #[inline(always)]
    pub fn changes(&self) -> &[TierChange] {
        &self.changes
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&TierChange> {
        self.changes.iter().find(|c| c.id == *id)
    }

    fn push(&mut self, change: TierChange) {
        // Never more entries than tiers.
        let _ = self.changes.try_push(change);
    }
}

/// Result of an inject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Injection {
    /// Tier units taken into the cell.
    pub accepted: u64,
    /// Tier units destroyed by overflow voiding.
    pub voided: u64,
    /// Tier units handed back to the caller.
    pub rejected: u64,
    pub changes: CrossTierDelta,
}

impl Injection {
    pub fn rejected_all(requested: u64) -> Self {
        Self {
            rejected: requested,
            ..Self::default()
        }
    }

    /// Units the caller no longer holds: accepted plus voided.
    #[inline(always)]
    pub const fn consumed(&self) -> u64 {
        self.accepted.saturating_add(self.voided)
    }
}

/// Result of an extract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub extracted: u64,
    pub changes: CrossTierDelta,
}

/// Per-cell compacting state.
///
/// `is_empty`/`is_full` are computed from the counter on every call. They are
/// never stored, so they can never disagree with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredLedger {
    chain: Option<CompressionChain>,
    // Identity of an orphaned counter. Unused while a chain is attached.
    held: Option<CounterIdentity>,
    stored: u64,
    capacity: u64,
    overflow_void: bool,
    tiers_up: u8,
    tiers_down: u8,
}

impl TieredLedger {
    pub const fn new(capacity: u64) -> Self {
        Self {
            chain: None,
            held: None,
            stored: 0,
            capacity,
            overflow_void: false,
            tiers_up: 1,
            tiers_down: 1,
        }
    }

    /// Rebuild from persisted parts. The counter is clamped to capacity.
    pub fn restore(capacity: u64, chain: Option<CompressionChain>, stored: u64) -> Self {
        Self {
            chain,
            held: None,
            stored: stored.min(capacity),
            capacity,
            overflow_void: false,
            tiers_up: 1,
            tiers_down: 1,
        }
    }

    /// Remember what an orphaned counter was denominated in.
    pub fn with_identity(mut self, identity: Option<CounterIdentity>) -> Self {
        self.held = identity;
        self
    }

    /// Main and base of the counter. Taken from the chain when attached.
    pub fn identity(&self) -> Option<CounterIdentity> {
        match &self.chain {
            Some(chain) => Some(CounterIdentity::of(chain)),
            None => self.held,
        }
    }

    /// Units held with no chain to read them through.
    #[inline(always)]
    pub fn is_orphaned(&self) -> bool {
        self.chain.is_none() && self.stored > 0
    }

    /// Pick up installed upgrades. Tier depths only affect the next partition.
    pub fn apply_policy(&mut self, policy: &dyn UpgradePolicy) {
        self.overflow_void = policy.has_overflow_void();
        self.tiers_up = effective_depth(policy.tier_extension_up());
        self.tiers_down = effective_depth(policy.tier_extension_down());
    }

    #[inline(always)]
    pub fn chain(&self) -> Option<&CompressionChain> {
        self.chain.as_ref()
    }

    #[inline(always)]
    pub fn stored(&self) -> u64 {
        self.stored
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.stored == self.capacity
    }

    #[inline(always)]
    pub fn overflow_void(&self) -> bool {
        self.overflow_void
    }

    #[inline(always)]
    pub fn tier_depths(&self) -> (u8, u8) {
        (self.tiers_up, self.tiers_down)
    }

    #[inline(always)]
    pub fn is_partitioned(&self) -> bool {
        self.chain.is_some()
    }

    /// Inbound filter: matches iff `id` is some tier of the current chain.
    pub fn accepts(&self, id: &ItemId) -> bool {
        self.chain.as_ref().is_some_and(|c| c.contains(id))
    }

    pub fn tier_of(&self, id: &ItemId) -> Option<usize> {
        self.chain.as_ref()?.index_of(id)
    }

    /// Bind to `id`, resolving its chain with the configured depths.
    pub fn partition<O: RecipeOracle>(
        &mut self,
        id: &ItemId,
        resolver: &ChainResolver<O>,
    ) -> Result<(), PartitionDenied> {
        self.check_partition(id)?;
        let chain = resolver.resolve(id, self.tiers_up, self.tiers_down);
        self.attach_chain(chain)
    }

    /// Cheap pre-check: a non-empty ledger only re-partitions to its own main.
    pub fn check_partition(&self, id: &ItemId) -> Result<(), PartitionDenied> {
        match &self.chain {
            Some(chain) if self.stored > 0 && chain.main().id != *id => {
                Err(PartitionDenied::NotEmpty {
                    stored: self.stored,
                })
            }
            _ => Ok(()),
        }
    }

    /// Install a resolved chain. A non-empty ledger keeps its chain unless the
    /// new one is identical.
    pub fn attach_chain(&mut self, chain: CompressionChain) -> Result<(), PartitionDenied> {
        if self.stored > 0 {
            return match &self.chain {
                Some(current) if *current == chain => Ok(()),
                Some(_) => Err(PartitionDenied::NotEmpty {
                    stored: self.stored,
                }),
                // Orphaned counter: units carry over only onto the same base.
                // A legacy counter with no recorded identity binds to the
                // first explicit partition.
                None => match self.held {
                    Some(held) if held.base != chain.base().id => {
                        Err(PartitionDenied::ForeignBase {
                            expected: held.base,
                            found: chain.base().id,
                        })
                    }
                    _ => {
                        self.chain = Some(chain);
                        self.held = None;
                        Ok(())
                    }
                },
            };
        }
        self.chain = Some(chain);
        self.held = None;
        Ok(())
    }

    /// Whole units of `tier` the counter covers.
    pub fn available(&self, tier: usize) -> u64 {
        match self.chain.as_ref().and_then(|c| c.rate(tier)) {
            Some(rate) => self.stored / rate,
            None => 0,
        }
    }

    /// Tier units that fit from empty.
    pub fn capacity_at(&self, tier: usize) -> u64 {
        match self.chain.as_ref().and_then(|c| c.rate(tier)) {
            Some(rate) => self.capacity / rate,
            None => 0,
        }
    }

    /// Add `units` of `tier`. Unpartitioned cells and unknown tiers take nothing.
    pub fn inject(&mut self, tier: usize, units: u64, mode: Mode) -> Injection {
        let rate = match self.chain.as_ref().and_then(|c| c.rate(tier)) {
            Some(rate) => rate,
            None => return Injection::rejected_all(units),
        };
        if units == 0 {
            return Injection::default();
        }

        let requested = saturating::mul(units, rate);
        let headroom = saturating::sub(self.capacity, self.stored);
        let fits = requested.min(headroom) / rate;
        let excess = units - fits;

        let (voided, rejected) = if self.overflow_void {
            (excess, 0)
        } else {
            (0, excess)
        };

        let mut out = Injection {
            accepted: fits,
            voided,
            rejected,
            changes: CrossTierDelta::new(),
        };

        if mode.is_commit() && fits > 0 {
            let before = self.snapshot();
            self.stored = saturating::add(self.stored, fits * rate);
            out.changes = self.diff(&before, tier);
        }
        out
    }

    pub fn inject_item(&mut self, id: &ItemId, units: u64, mode: Mode) -> Injection {
        match self.tier_of(id) {
            Some(tier) => self.inject(tier, units, mode),
            None => Injection::rejected_all(units),
        }
    }

    /// Remove up to `units` of `tier`.
    pub fn extract(&mut self, tier: usize, units: u64, mode: Mode) -> Extraction {
        let rate = match self.chain.as_ref().and_then(|c| c.rate(tier)) {
            Some(rate) => rate,
            None => return Extraction::default(),
        };

        let extracted = units.min(self.stored / rate);
        let mut out = Extraction {
            extracted,
            changes: CrossTierDelta::new(),
        };

        if mode.is_commit() && extracted > 0 {
            let before = self.snapshot();
            self.stored = saturating::sub(self.stored, extracted * rate);
            out.changes = self.diff(&before, tier);
        }
        out
    }

    pub fn extract_item(&mut self, id: &ItemId, units: u64, mode: Mode) -> Extraction {
        match self.tier_of(id) {
            Some(tier) => self.extract(tier, units, mode),
            None => Extraction::default(),
        }
    }

    fn snapshot(&self) -> ArrayVec<u64, MAX_CHAIN_TIERS> {
        let tiers = self.chain.as_ref().map(|c| c.len()).unwrap_or(0);
        (0..tiers).map(|t| self.available(t)).collect()
    }

    fn diff(&self, before: &[u64], operated: usize) -> CrossTierDelta {
        let mut delta = CrossTierDelta::new();
        let chain = match &self.chain {
            Some(chain) => chain,
            None => return delta,
        };
        for (tier, t) in chain.tiers().iter().enumerate() {
            if tier == operated {
                continue;
            }
            let after = self.available(tier);
            if after != before[tier] {
                delta.push(TierChange {
                    id: t.id,
                    before: before[tier],
                    after,
                });
            }
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::Tier;
    use crate::core::policy::{UpgradeCard, UpgradeSet};

    const NUGGET: ItemId = ItemId::new(1, 0);
    const INGOT: ItemId = ItemId::new(2, 0);
    const BLOCK: ItemId = ItemId::new(3, 0);
    const DIRT: ItemId = ItemId::new(9, 0);

    fn metal_chain() -> CompressionChain {
        CompressionChain::new(
            &[Tier::new(BLOCK, 81), Tier::new(INGOT, 9), Tier::new(NUGGET, 1)],
            1,
        )
        .unwrap()
    }

    fn ledger(capacity: u64) -> TieredLedger {
        let mut l = TieredLedger::new(capacity);
        l.attach_chain(metal_chain()).unwrap();
        l
    }

    #[test]
    fn test_unpartitioned_rejects_everything() {
        let mut l = TieredLedger::new(100);
        let r = l.inject(0, 5, Mode::Commit);
        assert_eq!(r.accepted, 0);
        assert_eq!(r.rejected, 5);
        assert_eq!(l.extract(0, 5, Mode::Commit).extracted, 0);
        assert_eq!(l.available(0), 0);
        assert!(!l.accepts(&NUGGET));
    }

    #[test]
    fn test_nugget_ingot_block_scenario() {
        let mut l = ledger(1_000_000);
        let r = l.inject(2, 81, Mode::Commit);
        assert_eq!(r.accepted, 81);
        assert_eq!(l.available(1), 9);
        assert_eq!(l.available(0), 1);

        let before = l.stored();
        let x = l.extract(0, 1, Mode::Commit);
        assert_eq!(x.extracted, 1);
        assert_eq!(l.stored(), before - 81);
        assert_eq!(l.available(2), 0);
    }

    #[test]
    fn test_cross_tier_delta_excludes_operated_tier() {
        let mut l = ledger(1_000_000);
        l.inject(2, 8, Mode::Commit);

        // Ninth nugget crosses the ingot boundary, not the block one.
        let r = l.inject(2, 1, Mode::Commit);
        assert_eq!(r.changes.changes().len(), 1);
        let ingot = r.changes.get(&INGOT).unwrap();
        assert_eq!((ingot.before, ingot.after), (0, 1));
        assert_eq!(ingot.delta(), 1);
        assert!(r.changes.get(&NUGGET).is_none());

        let x = l.extract(1, 1, Mode::Commit);
        let nugget = x.changes.get(&NUGGET).unwrap();
        assert_eq!(nugget.delta(), -9);
    }

    #[test]
    fn test_overflow_void_destroys_excess() {
        let mut l = TieredLedger::restore(100, Some(CompressionChain::single(DIRT)), 95);
        l.apply_policy(&UpgradeSet::from_cards(&[UpgradeCard::OverflowVoid]));

        let r = l.inject(0, 10, Mode::Commit);
        assert_eq!(r.accepted, 5);
        assert_eq!(r.voided, 5);
        assert_eq!(r.rejected, 0);
        assert!(l.is_full());
    }

    #[test]
    fn test_without_void_excess_is_returned() {
        let mut l = TieredLedger::restore(100, Some(CompressionChain::single(DIRT)), 95);
        let r = l.inject(0, 10, Mode::Commit);
        assert_eq!(r.accepted, 5);
        assert_eq!(r.voided, 0);
        assert_eq!(r.rejected, 5);
        assert_eq!(l.stored(), 100);
    }

    #[test]
    fn test_accepts_whole_tier_units_only() {
        let mut l = ledger(100);
        l.inject(2, 20, Mode::Commit);
        // 80 headroom, 9 per ingot → 8 ingots fit, 8 base units stay free.
        let r = l.inject(1, 10, Mode::Commit);
        assert_eq!(r.accepted, 8);
        assert_eq!(r.rejected, 2);
        assert_eq!(l.stored(), 92);
    }

    #[test]
    fn test_simulate_changes_nothing() {
        let mut l = ledger(1000);
        let r = l.inject(0, 3, Mode::Simulate);
        assert_eq!(r.accepted, 3);
        assert!(r.changes.is_empty());
        assert!(l.is_empty());

        l.inject(2, 50, Mode::Commit);
        let x = l.extract(1, 10, Mode::Simulate);
        assert_eq!(x.extracted, 5);
        assert_eq!(l.stored(), 50);
    }

    #[test]
    fn test_unknown_identity_is_filtered() {
        let mut l = ledger(1000);
        assert!(l.accepts(&INGOT));
        assert!(!l.accepts(&DIRT));
        assert_eq!(l.inject_item(&DIRT, 4, Mode::Commit).rejected, 4);
        assert_eq!(l.inject(7, 4, Mode::Commit).accepted, 0);
        assert_eq!(l.inject_item(&BLOCK, 1, Mode::Commit).accepted, 1);
        assert_eq!(l.extract_item(&DIRT, 1, Mode::Commit).extracted, 0);
    }

    #[test]
    fn test_repartition_only_when_empty() {
        let mut l = ledger(1000);
        l.inject(2, 1, Mode::Commit);
        assert_eq!(
            l.attach_chain(CompressionChain::single(DIRT)),
            Err(PartitionDenied::NotEmpty { stored: 1 })
        );
        assert_eq!(l.attach_chain(metal_chain()), Ok(()));
        assert_eq!(l.chain(), Some(&metal_chain()));

        l.extract(2, 1, Mode::Commit);
        assert!(l.attach_chain(CompressionChain::single(DIRT)).is_ok());
        assert_eq!(l.chain().unwrap().main().id, DIRT);
    }

    #[test]
    fn test_saturating_request_does_not_overflow() {
        let mut l = ledger(u64::MAX);
        let r = l.inject(0, u64::MAX, Mode::Commit);
        assert_eq!(r.accepted, u64::MAX / 81);
        assert!(l.stored() <= l.capacity());
        assert_eq!(r.accepted + r.rejected, u64::MAX);
    }

    #[test]
    fn test_orphaned_counter_adopts_only_its_own_base() {
        let identity = CounterIdentity {
            main: INGOT,
            base: NUGGET,
        };
        let mut l = TieredLedger::restore(1000, None, 90).with_identity(Some(identity));
        assert!(l.is_orphaned());
        assert_eq!(l.identity(), Some(identity));

        assert_eq!(
            l.attach_chain(CompressionChain::single(DIRT)),
            Err(PartitionDenied::ForeignBase {
                expected: NUGGET,
                found: DIRT,
            })
        );
        assert!(l.chain().is_none());
        assert_eq!(l.stored(), 90);

        l.attach_chain(metal_chain()).unwrap();
        assert!(!l.is_orphaned());
        assert_eq!(l.available(1), 10);
        assert_eq!(l.identity(), Some(identity));
    }

    #[test]
    fn test_orphan_without_identity_binds_to_first_chain() {
        let mut l = TieredLedger::restore(1000, None, 18);
        assert_eq!(l.identity(), None);
        l.attach_chain(metal_chain()).unwrap();
        assert_eq!(l.available(1), 2);
    }

    #[test]
    fn test_restore_clamps_counter() {
        let l = TieredLedger::restore(10, Some(CompressionChain::single(DIRT)), 50);
        assert_eq!(l.stored(), 10);
        assert!(l.is_full());
    }
}
