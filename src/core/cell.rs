//! Storage cells. Closed set of ledger kinds behind one capability.

use super::chain::CompressionChain;
use super::dense::DenseLedger;
use super::item::ItemId;
use super::ledger::{Extraction, Injection, Mode, TieredLedger};
use super::policy::UpgradePolicy;
use super::registry::{CellKind, CellLayout};

/// What the storage fabric can do with any cell.
pub trait CellInventory {
    fn available(&self, id: &ItemId) -> u64;
    fn inject(&mut self, id: &ItemId, units: u64, mode: Mode) -> Injection;
    fn extract(&mut self, id: &ItemId, units: u64, mode: Mode) -> Extraction;
    fn accepts(&self, id: &ItemId) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCell {
    Compacting(TieredLedger),
    Dense(DenseLedger),
}

impl StorageCell {
    pub fn for_kind(kind: &CellKind) -> Self {
        match kind.layout {
            CellLayout::Compacting => StorageCell::Compacting(kind.new_tiered()),
            CellLayout::Dense { .. } => StorageCell::Dense(kind.new_dense()),
        }
    }

    pub fn apply_policy(&mut self, policy: &dyn UpgradePolicy) {
        match self {
            StorageCell::Compacting(l) => l.apply_policy(policy),
            StorageCell::Dense(d) => d.apply_policy(policy),
        }
    }

    #[inline]
    pub fn as_tiered(&self) -> Option<&TieredLedger> {
        match self {
            StorageCell::Compacting(l) => Some(l),
            StorageCell::Dense(_) => None,
        }
    }

    #[inline]
    pub fn as_tiered_mut(&mut self) -> Option<&mut TieredLedger> {
        match self {
            StorageCell::Compacting(l) => Some(l),
            StorageCell::Dense(_) => None,
        }
    }

    #[inline]
    pub fn as_dense(&self) -> Option<&DenseLedger> {
        match self {
            StorageCell::Dense(d) => Some(d),
            StorageCell::Compacting(_) => None,
        }
    }

    pub fn chain(&self) -> Option<&CompressionChain> {
        self.as_tiered().and_then(|l| l.chain())
    }

    pub fn stored(&self) -> u64 {
        match self {
            StorageCell::Compacting(l) => l.stored(),
            StorageCell::Dense(d) => d.stored(),
        }
    }

    pub fn capacity(&self) -> u64 {
        match self {
            StorageCell::Compacting(l) => l.capacity(),
            StorageCell::Dense(d) => d.capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StorageCell::Compacting(l) => l.is_empty(),
            StorageCell::Dense(d) => d.is_empty(),
        }
    }

    pub fn is_full(&self) -> bool {
        match self {
            StorageCell::Compacting(l) => l.is_full(),
            StorageCell::Dense(d) => d.is_full(),
        }
    }
}

impl CellInventory for StorageCell {
    fn available(&self, id: &ItemId) -> u64 {
        match self {
            StorageCell::Compacting(l) => l.tier_of(id).map(|t| l.available(t)).unwrap_or(0),
            StorageCell::Dense(d) => d.available(id),
        }
    }

    fn inject(&mut self, id: &ItemId, units: u64, mode: Mode) -> Injection {
        match self {
            StorageCell::Compacting(l) => l.inject_item(id, units, mode),
            StorageCell::Dense(d) => d.inject(id, units, mode),
        }
    }

    fn extract(&mut self, id: &ItemId, units: u64, mode: Mode) -> Extraction {
        match self {
            StorageCell::Compacting(l) => l.extract_item(id, units, mode),
            StorageCell::Dense(d) => d.extract(id, units, mode),
        }
    }

    fn accepts(&self, id: &ItemId) -> bool {
        match self {
            StorageCell::Compacting(l) => l.accepts(id),
            StorageCell::Dense(d) => d.accepts(id),
        }
    }
}
