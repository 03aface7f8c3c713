//! Walk one compacting cell through a few steps.
//!
//! Nuggets go in, ingots and blocks appear, the step ends, one merged
//! notification comes out, and the cell survives a detach/attach.

use tiercell::core::batch::{ChannelId, NotificationSink, Provenance};
use tiercell::core::item::{ItemId, ItemStack};
use tiercell::core::persist::MemoryRegion;
use tiercell::core::resolver::RecipeOracle;
use tiercell::core::{Kernel, Mode, Registry, UpgradeCard, UpgradeSet};

const NUGGET: ItemId = ItemId::new(1, 0);
const INGOT: ItemId = ItemId::new(2, 0);
const BLOCK: ItemId = ItemId::new(3, 0);

struct Metal;

impl RecipeOracle for Metal {
    fn match_grid(&self, width: u8, height: u8, filled_with: &ItemId) -> Vec<ItemStack> {
        match (width, height, *filled_with) {
            (3, 3, NUGGET) => vec![ItemStack::one(INGOT)],
            (3, 3, INGOT) => vec![ItemStack::one(BLOCK)],
            (1, 1, INGOT) => vec![ItemStack::new(NUGGET, 9)],
            (1, 1, BLOCK) => vec![ItemStack::new(INGOT, 9)],
            _ => Vec::new(),
        }
    }
}

struct Console;

impl NotificationSink for Console {
    fn notify(&mut self, channel: ChannelId, changes: &[(ItemId, i128)], provenance: Provenance) {
        for (id, delta) in changes {
            println!("  channel {channel}: {id} {delta:+} ({provenance:?})");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut kernel = Kernel::new(Registry::standard(), Some(Metal), Some(Console));
    let upgrades = UpgradeSet::from_cards(&[
        UpgradeCard::TierExtension { up: 2, down: 2 },
        UpgradeCard::OverflowVoid,
    ]);
    kernel.attach(1, "compacting_1k", Box::new(MemoryRegion::new()), upgrades.clone())?;

    println!("step {}: 100 nuggets, one at a time", kernel.step());
    for _ in 0..100 {
        kernel.insert(1, &NUGGET, 1, Mode::Commit)?;
    }
    let report = kernel.end_step();
    println!("  flushed: {report:?}");
    print!("{}", kernel.describe(1)?);

    println!("step {}: take a block, fill to the brim", kernel.step());
    let taken = kernel.extract(1, &BLOCK, 1, Mode::Commit)?;
    // The host acknowledges its own slot; cross-tier fallout arrives merged at
    // the end of the step.
    if let Some(console) = kernel.sink_mut() {
        console.notify(0, &[(BLOCK, -(taken.extracted as i128))], Provenance::Slot { ledger: 1 });
    }
    let out = kernel.insert(1, &INGOT, 1_000, Mode::Commit)?;
    println!(
        "  ingots accepted {}, voided {}, rejected {}",
        out.accepted, out.voided, out.rejected
    );
    kernel.end_step();
    print!("{}", kernel.describe(1)?);

    let region = kernel.detach(1)?;
    let report = kernel.attach(1, "compacting_1k", region, upgrades)?;
    println!("reattached, repaired: {}", report.repaired());
    print!("{}", kernel.describe(1)?);

    println!("{}", kernel.metrics().render_prometheus("tiercell"));
    Ok(())
}
