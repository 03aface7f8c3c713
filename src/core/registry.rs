//! Cell kinds and upgrade cards, registered once at startup.
//!
//! Build with [`RegistryBuilder`], freeze into a [`Registry`], share it by
//! `Arc`. Lookups before `build()` are impossible by construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::dense::DenseLedger;
use super::ledger::TieredLedger;
use super::policy::UpgradeCard;
use super::saturating::{self, HYPER_MULTIPLIER};

/// Base units per displayed byte.
pub const UNITS_PER_BYTE: u64 = 8;

/// How a kind lays out its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellLayout {
    /// One item, many tiers.
    Compacting,
    /// Many items, one tier each.
    Dense { type_limit: usize },
}

/// A registered cell kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellKind {
    pub name: String,
    pub layout: CellLayout,
    /// Displayed capacity.
    pub bytes: u64,
    pub units_per_byte: u64,
    pub multiplier: u64,
}

impl CellKind {
    pub fn compacting(name: &str, bytes: u64) -> Self {
        Self {
            name: name.to_owned(),
            layout: CellLayout::Compacting,
            bytes,
            units_per_byte: UNITS_PER_BYTE,
            multiplier: 1,
        }
    }

    pub fn dense(name: &str, bytes: u64, type_limit: usize) -> Self {
        Self {
            name: name.to_owned(),
            layout: CellLayout::Dense { type_limit },
            bytes,
            units_per_byte: UNITS_PER_BYTE,
            multiplier: 1,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u64) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Base units the kind holds. Clamps at `u64::MAX`.
    #[inline]
    pub fn capacity_units(&self) -> u64 {
        saturating::capacity_units(self.bytes, self.units_per_byte, self.multiplier)
    }

    /// Displayed bytes in use for `stored` base units.
    #[inline]
    pub fn bytes_used(&self, stored: u64) -> u64 {
        saturating::bytes_used(stored, self.bytes, self.capacity_units())
    }

    pub fn is_hyper(&self) -> bool {
        self.multiplier > 1
    }

    pub(crate) fn new_tiered(&self) -> TieredLedger {
        TieredLedger::new(self.capacity_units())
    }

    pub(crate) fn new_dense(&self) -> DenseLedger {
        let limit = match self.layout {
            CellLayout::Dense { type_limit } => type_limit,
            CellLayout::Compacting => 1,
        };
        DenseLedger::new(self.capacity_units(), limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("name already registered")]
    Duplicate,
    #[error("cell kind has zero capacity")]
    ZeroCapacity,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    kinds: BTreeMap<String, CellKind>,
    upgrades: BTreeMap<String, UpgradeCard>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&mut self, kind: CellKind) -> Result<&mut Self, RegistryError> {
        if kind.capacity_units() == 0 {
            return Err(RegistryError::ZeroCapacity);
        }
        if self.kinds.contains_key(&kind.name) {
            return Err(RegistryError::Duplicate);
        }
        self.kinds.insert(kind.name.clone(), kind);
        Ok(self)
    }

    pub fn upgrade(&mut self, name: &str, card: UpgradeCard) -> Result<&mut Self, RegistryError> {
        if self.upgrades.contains_key(name) {
            return Err(RegistryError::Duplicate);
        }
        self.upgrades.insert(name.to_owned(), card);
        Ok(self)
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            kinds: self.kinds,
            upgrades: self.upgrades,
        })
    }
}

fn register_standard(b: &mut RegistryBuilder) -> Result<(), RegistryError> {
    for k in [1u64, 4, 16, 64, 256] {
        let bytes = k * 1024;
        b.kind(CellKind::compacting(&format!("compacting_{k}k"), bytes))?;
        b.kind(
            CellKind::compacting(&format!("hyper_compacting_{k}k"), bytes)
                .with_multiplier(HYPER_MULTIPLIER),
        )?;
    }
    for k in [1u64, 4, 16, 64] {
        b.kind(
            CellKind::dense(&format!("hyper_dense_{k}k"), k * 1024, DenseLedger::DEFAULT_TYPE_LIMIT)
                .with_multiplier(HYPER_MULTIPLIER),
        )?;
    }
    b.upgrade("overflow_void", UpgradeCard::OverflowVoid)?
        .upgrade("tier_extension", UpgradeCard::TierExtension { up: 2, down: 2 })?
        .upgrade("equal_distribution", UpgradeCard::EqualDistribution(1))?;
    Ok(())
}

/// Frozen lookup tables.
#[derive(Debug)]
pub struct Registry {
    kinds: BTreeMap<String, CellKind>,
    upgrades: BTreeMap<String, UpgradeCard>,
}

impl Registry {
    /// Compacting 1k..256k, hyper variants of each, dense 1k..64k,
    /// and the three upgrade cards.
    pub fn standard() -> Arc<Registry> {
        let mut b = RegistryBuilder::new();
        let registered = register_standard(&mut b);
        debug_assert!(registered.is_ok(), "standard registry: {registered:?}");
        b.build()
    }

    pub fn kind(&self, name: &str) -> Option<&CellKind> {
        self.kinds.get(name)
    }

    pub fn upgrade(&self, name: &str) -> Option<UpgradeCard> {
        self.upgrades.get(name).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &CellKind> {
        self.kinds.values()
    }
}
