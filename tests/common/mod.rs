//! Shared fixtures: a three-tier metal ladder and a recording sink.

#![allow(dead_code)]

use tiercell::core::batch::{ChannelId, NotificationSink, Provenance};
use tiercell::core::item::{ItemId, ItemStack};
use tiercell::core::resolver::RecipeOracle;

pub const NUGGET: ItemId = ItemId::new(1, 0);
pub const INGOT: ItemId = ItemId::new(2, 0);
pub const BLOCK: ItemId = ItemId::new(3, 0);
pub const GEM: ItemId = ItemId::new(10, 0);
pub const STONE: ItemId = ItemId::new(20, 0);

/// nugget ×9 ⇄ ingot ×9 ⇄ block. Gems only compress one way.
pub struct Metal;

impl RecipeOracle for Metal {
    fn match_grid(&self, width: u8, height: u8, filled_with: &ItemId) -> Vec<ItemStack> {
        match (width, height, *filled_with) {
            (3, 3, NUGGET) => vec![ItemStack::one(INGOT)],
            (3, 3, INGOT) => vec![ItemStack::one(BLOCK)],
            (1, 1, INGOT) => vec![ItemStack::new(NUGGET, 9)],
            (1, 1, BLOCK) => vec![ItemStack::new(INGOT, 9)],
            (3, 3, GEM) => vec![ItemStack::one(STONE)],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Inbox {
    pub received: Vec<(ChannelId, Vec<(ItemId, i128)>, Provenance)>,
}

impl NotificationSink for Inbox {
    fn notify(&mut self, channel: ChannelId, changes: &[(ItemId, i128)], provenance: Provenance) {
        self.received.push((channel, changes.to_vec(), provenance));
    }
}
