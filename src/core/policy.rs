//! Upgrade cards and the read-only policy view ledgers consult.

use arrayvec::ArrayVec;

/// Tier depth used when no extension is installed (or it reports 0).
pub const DEFAULT_TIER_DEPTH: u8 = 1;

/// Upgrade slots per cell.
pub const MAX_UPGRADES: usize = 8;

/// What a ledger may ask about its installed upgrades.
pub trait UpgradePolicy {
    fn has_overflow_void(&self) -> bool;

    /// Extra compression tiers above the partition. 0 = default depth.
    fn tier_extension_up(&self) -> u8;

    /// Extra decompression tiers below the partition. 0 = default depth.
    fn tier_extension_down(&self) -> u8;

    /// Equal-distribution share count for dense cells. 0 = off.
    fn equal_distribution(&self) -> u8 {
        0
    }
}

/// Depth actually searched for a reported extension value.
#[inline(always)]
pub const fn effective_depth(reported: u8) -> u8 {
    if reported == 0 {
        DEFAULT_TIER_DEPTH
    } else {
        reported
    }
}

/// No upgrades installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpgrades;

impl UpgradePolicy for NoUpgrades {
    fn has_overflow_void(&self) -> bool {
        false
    }
    fn tier_extension_up(&self) -> u8 {
        0
    }
    fn tier_extension_down(&self) -> u8 {
        0
    }
}

/// A single upgrade card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeCard {
    OverflowVoid,
    TierExtension { up: u8, down: u8 },
    EqualDistribution(u8),
}

/// Cards installed in one cell. Duplicate effects don't stack; the largest
/// extension and the smallest non-zero distribution win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeSet {
    cards: ArrayVec<UpgradeCard, MAX_UPGRADES>,
}

impl UpgradeSet {
    pub const fn new() -> Self {
        Self {
            cards: ArrayVec::new_const(),
        }
    }

    pub fn from_cards(cards: &[UpgradeCard]) -> Self {
        let mut set = Self::new();
        for card in cards {
            if !set.install(*card) {
                break;
            }
        }
        set
    }

    /// Install a card. False when every slot is taken.
    pub fn install(&mut self, card: UpgradeCard) -> bool {
        self.cards.try_push(card).is_ok()
    }

    /// Remove the first matching card.
    pub fn remove(&mut self, card: &UpgradeCard) -> bool {
        match self.cards.iter().position(|c| c == card) {
            Some(idx) => {
                self.cards.remove(idx);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    pub fn cards(&self) -> &[UpgradeCard] {
        &self.cards
    }
}

impl UpgradePolicy for UpgradeSet {
    fn has_overflow_void(&self) -> bool {
        self.cards.iter().any(|c| matches!(c, UpgradeCard::OverflowVoid))
    }

    fn tier_extension_up(&self) -> u8 {
        self.cards
            .iter()
            .filter_map(|c| match c {
                UpgradeCard::TierExtension { up, .. } => Some(*up),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn tier_extension_down(&self) -> u8 {
        self.cards
            .iter()
            .filter_map(|c| match c {
                UpgradeCard::TierExtension { down, .. } => Some(*down),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn equal_distribution(&self) -> u8 {
        self.cards
            .iter()
            .filter_map(|c| match c {
                UpgradeCard::EqualDistribution(n) if *n > 0 => Some(*n),
                _ => None,
            })
            .min()
            .unwrap_or(0)
    }
}
