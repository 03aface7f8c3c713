//! Compression chain: ordered tiers, most compressed first, rates in base units.

use arrayvec::ArrayVec;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::item::ItemId;

/// Hard cap on chain length. 4^32 already overflows u64 rates.
pub const MAX_CHAIN_TIERS: usize = 16;

pub type Tiers = ArrayVec<Tier, MAX_CHAIN_TIERS>;

/// One compression level. `rate` = base units per unit of this tier.
///
/// Also the persisted record layout: 48 bytes, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Tier {
    pub rate: u64,
    pub id: ItemId,
}

const _: () = {
    assert!(core::mem::size_of::<Tier>() == 48);
};

impl Tier {
    pub const SIZE: usize = 48;

    #[inline(always)]
    pub const fn new(id: ItemId, rate: u64) -> Self {
        Self { rate, id }
    }
}

/// Why a tier list can't be a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("chain has no tiers")]
    Empty,
    #[error("chain exceeds {} tiers", MAX_CHAIN_TIERS)]
    TooLong,
    #[error("lowest tier rate must be 1")]
    BaseRateNotOne,
    #[error("rate at tier {0} does not strictly exceed the tier below")]
    NotIncreasing(usize),
    #[error("main index {0} out of range")]
    MainOutOfRange(usize),
    #[error("identity repeats at tier {0}")]
    DuplicateIdentity(usize),
}

/// Tiers `t[0..T)` plus the tier the cell was partitioned on.
///
/// Invariants, checked on construction:
/// - `T >= 1`, `main_index < T`
/// - `rate[T-1] == 1`, rates strictly increase toward index 0
/// - no identity appears twice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionChain {
    tiers: Tiers,
    main_index: usize,
}

impl CompressionChain {
    /// Degenerate chain: the identity alone, rate 1.
    pub fn single(id: ItemId) -> Self {
        let mut tiers = Tiers::new();
        tiers.push(Tier::new(id, 1));
        Self {
            tiers,
            main_index: 0,
        }
    }

    pub fn new(tiers: &[Tier], main_index: usize) -> Result<Self, ChainError> {
        if tiers.is_empty() {
            return Err(ChainError::Empty);
        }
        if tiers.len() > MAX_CHAIN_TIERS {
            return Err(ChainError::TooLong);
        }
        if tiers[tiers.len() - 1].rate != 1 {
            return Err(ChainError::BaseRateNotOne);
        }
        for i in 0..tiers.len() - 1 {
            if tiers[i].rate <= tiers[i + 1].rate {
                return Err(ChainError::NotIncreasing(i));
            }
        }
        for i in 1..tiers.len() {
            if tiers[..i].iter().any(|t| t.id == tiers[i].id) {
                return Err(ChainError::DuplicateIdentity(i));
            }
        }
        if main_index >= tiers.len() {
            return Err(ChainError::MainOutOfRange(main_index));
        }

        let mut owned = Tiers::new();
        owned.extend(tiers.iter().copied());
        Ok(Self {
            tiers: owned,
            main_index,
        })
    }

    #[inline(always)]
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; a chain has at least one tier.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    #[inline(always)]
    pub fn main_index(&self) -> usize {
        self.main_index
    }

    /// Identity the cell was partitioned on.
    #[inline(always)]
    pub fn main(&self) -> &Tier {
        &self.tiers[self.main_index]
    }

    /// Lowest tier. Its unit is the ledger's counter unit.
    #[inline(always)]
    pub fn base(&self) -> &Tier {
        &self.tiers[self.tiers.len() - 1]
    }

    #[inline(always)]
    pub fn tier(&self, index: usize) -> Option<&Tier> {
        self.tiers.get(index)
    }

    #[inline(always)]
    pub fn rate(&self, index: usize) -> Option<u64> {
        self.tiers.get(index).map(|t| t.rate)
    }

    pub fn index_of(&self, id: &ItemId) -> Option<usize> {
        self.tiers.iter().position(|t| t.id == *id)
    }

    #[inline]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.index_of(id).is_some()
    }

    /// BLAKE3 over the encoded tier list and main index.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for tier in &self.tiers {
            hasher.update(tier.as_bytes());
        }
        hasher.update(&(self.main_index as u32).to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}
