//! Chain discovery. Ask the recipe oracle, verify every step is invertible.
//!
//! Up: fill a 3×3 (then 2×2) grid with the identity; a candidate output counts
//! only if a 1×1 grid of it gives back exactly 9 (or 4) of the identity.
//! Down: a 1×1 grid of the identity; an output of 4 or 9 counts only if the
//! matching grid of it crafts back into exactly one identity. Count-1 oracles
//! get a fallback that probes 3×3 then 2×2 grids of the candidate.

use arrayvec::ArrayVec;
use tracing::debug;

use super::chain::{CompressionChain, Tier, Tiers, MAX_CHAIN_TIERS};
use super::item::{ItemId, ItemStack};

/// External crafting system. Answers "what does a `width`×`height` grid,
/// each slot holding one `filled_with`, produce?"
///
/// Only 1×1, 2×2 and 3×3 are ever asked.
pub trait RecipeOracle {
    fn match_grid(&self, width: u8, height: u8, filled_with: &ItemId) -> Vec<ItemStack>;
}

impl<O: RecipeOracle + ?Sized> RecipeOracle for &O {
    fn match_grid(&self, width: u8, height: u8, filled_with: &ItemId) -> Vec<ItemStack> {
        (**self).match_grid(width, height, filled_with)
    }
}

/// One verified neighbor and how many of the smaller item make one larger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub id: ItemId,
    pub ratio: u64,
}

/// Grid edges tried for compression, in preference order.
const GRIDS: [u8; 2] = [3, 2];

#[derive(Debug, Clone)]
pub struct ChainResolver<O: RecipeOracle> {
    oracle: O,
}

impl<O: RecipeOracle> ChainResolver<O> {
    pub const fn new(oracle: O) -> Self {
        Self { oracle }
    }

    #[inline(always)]
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Next more-compressed tier above `id`, if one verifies.
    pub fn higher(&self, id: &ItemId) -> Option<Step> {
        for edge in GRIDS {
            let want = (edge as u32) * (edge as u32);
            for candidate in self.oracle.match_grid(edge, edge, id) {
                if candidate.id == *id {
                    continue;
                }
                let reverse = self.oracle.match_grid(1, 1, &candidate.id);
                if reverse.iter().any(|r| r.id == *id && r.count == want) {
                    return Some(Step {
                        id: candidate.id,
                        ratio: want as u64,
                    });
                }
            }
        }
        None
    }

    /// Next less-compressed tier below `id`, if one verifies.
    pub fn lower(&self, id: &ItemId) -> Option<Step> {
        let candidates: Vec<ItemStack> = self
            .oracle
            .match_grid(1, 1, id)
            .into_iter()
            .filter(|c| c.id != *id)
            .collect();

        for candidate in &candidates {
            let edge = match candidate.count {
                9 => 3,
                4 => 2,
                _ => continue,
            };
            if self.crafts_back(edge, &candidate.id, id) {
                return Some(Step {
                    id: candidate.id,
                    ratio: candidate.count as u64,
                });
            }
        }

        for candidate in &candidates {
            for edge in GRIDS {
                if self.crafts_back(edge, &candidate.id, id) {
                    return Some(Step {
                        id: candidate.id,
                        ratio: (edge as u64) * (edge as u64),
                    });
                }
            }
        }

        None
    }

    fn crafts_back(&self, edge: u8, from: &ItemId, expected: &ItemId) -> bool {
        self.oracle
            .match_grid(edge, edge, from)
            .iter()
            .any(|r| r.id == *expected && r.count == 1)
    }

    /// Build the chain around `id`: up to `tiers_up` steps toward more
    /// compressed forms, `tiers_down` toward less. Never fails; an isolated
    /// identity yields a single-tier chain.
    pub fn resolve(&self, id: &ItemId, tiers_up: u8, tiers_down: u8) -> CompressionChain {
        self.resolve_stack(&ItemStack::one(*id), tiers_up, tiers_down)
    }

    pub fn resolve_stack(&self, stack: &ItemStack, tiers_up: u8, tiers_down: u8) -> CompressionChain {
        let origin = stack.normalized();
        let mut seen: ArrayVec<ItemId, MAX_CHAIN_TIERS> = ArrayVec::new();
        seen.push(origin);

        let mut ups: ArrayVec<Step, MAX_CHAIN_TIERS> = ArrayVec::new();
        let mut current = origin;
        for _ in 0..tiers_up {
            if seen.is_full() {
                break;
            }
            match self.higher(&current) {
                Some(step) if !seen.contains(&step.id) => {
                    seen.push(step.id);
                    ups.push(step);
                    current = step.id;
                }
                _ => break,
            }
        }

        let mut downs: ArrayVec<Step, MAX_CHAIN_TIERS> = ArrayVec::new();
        current = origin;
        for _ in 0..tiers_down {
            if seen.is_full() {
                break;
            }
            match self.lower(&current) {
                Some(step) if !seen.contains(&step.id) => {
                    seen.push(step.id);
                    downs.push(step);
                    current = step.id;
                }
                _ => break,
            }
        }

        let chain = assemble(origin, &ups, &downs);
        debug!(
            origin = %origin,
            tiers = chain.len(),
            main = chain.main_index(),
            "resolved compression chain"
        );
        chain
    }
}

/// Lay tiers out most-compressed first and fold the step ratios into
/// absolute rates. With at most `MAX_CHAIN_TIERS` tiers of ratio <= 9 the top
/// rate is bounded by 9^15, well inside u64.
fn assemble(origin: ItemId, ups: &[Step], downs: &[Step]) -> CompressionChain {
    let mut tiers = Tiers::new();
    for step in ups.iter().rev() {
        tiers.push(Tier::new(step.id, 0));
    }
    let main_index = tiers.len();
    tiers.push(Tier::new(origin, 0));
    for step in downs {
        tiers.push(Tier::new(step.id, 0));
    }

    // Ratio between tier i and tier i+1, in top-down order.
    let ratios = ups
        .iter()
        .rev()
        .map(|s| s.ratio)
        .chain(downs.iter().map(|s| s.ratio));

    let mut rate = 1u64;
    let last = tiers.len() - 1;
    tiers[last].rate = 1;
    let ratios: ArrayVec<u64, MAX_CHAIN_TIERS> = ratios.collect();
    for i in (0..last).rev() {
        rate = rate.saturating_mul(ratios[i]);
        tiers[i].rate = rate;
    }

    CompressionChain::new(&tiers, main_index).unwrap_or_else(|_| CompressionChain::single(origin))
}
