use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tiercell::core::chain::{CompressionChain, Tier};
use tiercell::core::item::{ItemId, ItemStack};
use tiercell::core::ledger::{Mode, TieredLedger};
use tiercell::core::persist::MemoryRegion;
use tiercell::core::resolver::{ChainResolver, RecipeOracle};
use tiercell::core::saturating;
use tiercell::core::{Kernel, Registry, UpgradeCard, UpgradeSet};

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

struct Quiet;

impl tiercell::core::NotificationSink for Quiet {
    fn notify(
        &mut self,
        _channel: u32,
        changes: &[(ItemId, i128)],
        _provenance: tiercell::core::Provenance,
    ) {
        black_box(changes);
    }
}

fn metal_ledger() -> TieredLedger {
    let mut ledger = TieredLedger::new(u64::MAX);
    let chain = CompressionChain::new(
        &[Tier::new(BLOCK, 81), Tier::new(INGOT, 9), Tier::new(NUGGET, 1)],
        1,
    )
    .unwrap();
    ledger.attach_chain(chain).unwrap();
    ledger
}

fn bench_mul_div(c: &mut Criterion) {
    c.bench_function("mul_div_split_path", |b| {
        b.iter(|| {
            saturating::mul_div(
                black_box(u64::MAX / 3),
                black_box(u64::MAX / 7),
                black_box(13),
                black_box(u64::MAX / 5),
            )
        })
    });
}

fn bench_inject(c: &mut Criterion) {
    let mut ledger = metal_ledger();
    c.bench_function("ledger_inject_commit", |b| {
        b.iter(|| black_box(ledger.inject(black_box(2), black_box(9), Mode::Commit)))
    });

    let ledger = metal_ledger();
    c.bench_function("ledger_inject_simulate", |b| {
        b.iter_batched(
            || ledger.clone(),
            |mut l| black_box(l.inject(0, black_box(1), Mode::Simulate)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_resolve(c: &mut Criterion) {
    let resolver = ChainResolver::new(Metal);
    c.bench_function("resolve_three_tiers", |b| {
        b.iter(|| black_box(resolver.resolve(black_box(&INGOT), 2, 2)))
    });
}

fn bench_step(c: &mut Criterion) {
    c.bench_function("kernel_step_64_inserts", |b| {
        b.iter_batched(
            || {
                let mut k: Kernel<Metal, Quiet> =
                    Kernel::new(Registry::standard(), Some(Metal), Some(Quiet));
                let cards = UpgradeSet::from_cards(&[UpgradeCard::TierExtension { up: 2, down: 2 }]);
                k.attach(1, "hyper_compacting_1k", Box::new(MemoryRegion::new()), cards)
                    .unwrap();
                k
            },
            |mut k| {
                for _ in 0..64 {
                    let _ = k.insert(1, &NUGGET, 9, Mode::Commit);
                }
                black_box(k.end_step())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_mul_div, bench_inject, bench_resolve, bench_step);
criterion_main!(benches);
