//! Cell persistence. A flat key-value region per cell.
//!
//! Keys written:
//! - `tiers`         N × 48-byte [`Tier`] records, most compressed first
//! - `tiers.digest`  BLAKE3 of the chain ([`CompressionChain::digest`])
//! - `main`          u32 LE main tier index
//! - `main.id`       40-byte [`ItemId`] of the main tier
//! - `base.id`       40-byte [`ItemId`] of the base tier
//! - `stored`        u64 LE base-unit counter
//! - `entries`       N × 48-byte [`DenseRecord`] (dense cells)
//! - `filter`        N × 40-byte [`ItemId`] (dense cells)
//! - `echo.*`        installed-upgrade echoes, informational only
//!
//! Load never fails. Missing keys mean a fresh cell. Legacy `stored.hi` /
//! `stored.lo` halves are merged; legacy `full` / `empty` flags are ignored
//! and dropped on the next save. A chain that fails its digest is discarded
//! and the counter kept, together with the `main.id` / `base.id` pair it was
//! denominated in so the chain can be rebuilt over the same base.

use std::collections::BTreeMap;

use tracing::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::cell::StorageCell;
use super::chain::{CompressionChain, Tier};
use super::dense::DenseLedger;
use super::item::ItemId;
use super::ledger::{CounterIdentity, TieredLedger};
use super::policy::UpgradePolicy;
use super::registry::{CellKind, CellLayout};

pub const KEY_TIERS: &str = "tiers";
pub const KEY_DIGEST: &str = "tiers.digest";
pub const KEY_MAIN: &str = "main";
pub const KEY_MAIN_ID: &str = "main.id";
pub const KEY_BASE_ID: &str = "base.id";
pub const KEY_STORED: &str = "stored";
pub const KEY_ENTRIES: &str = "entries";
pub const KEY_FILTER: &str = "filter";
pub const KEY_ECHO_VOID: &str = "echo.void";
pub const KEY_ECHO_UP: &str = "echo.up";
pub const KEY_ECHO_DOWN: &str = "echo.down";
pub const KEY_ECHO_DIST: &str = "echo.dist";

pub const LEGACY_STORED_HI: &str = "stored.hi";
pub const LEGACY_STORED_LO: &str = "stored.lo";
pub const LEGACY_FULL: &str = "full";
pub const LEGACY_EMPTY: &str = "empty";

/// Per-cell backing store owned by the host.
pub trait KvRegion {
    fn get(&self, key: &str) -> Option<&[u8]>;
    fn put(&mut self, key: &str, value: &[u8]);
    fn remove(&mut self, key: &str);
}

/// In-memory region. Tests, tools, and hosts without their own store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRegion {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl KvRegion for MemoryRegion {
    fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    fn put(&mut self, key: &str, value: &[u8]) {
        self.entries.insert(key.to_owned(), value.to_vec());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Dense cell entry on disk. 48 bytes, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DenseRecord {
    pub amount: u64,
    pub id: ItemId,
}

const _: () = {
    assert!(core::mem::size_of::<DenseRecord>() == 48);
};

/// What load had to fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub legacy_counter: bool,
    pub discarded_flags: bool,
    pub chain_dropped: bool,
    /// A dropped chain was re-resolved from the counter's identity on attach.
    pub chain_rebuilt: bool,
    pub counter_clamped: bool,
}

impl LoadReport {
    pub fn repaired(&self) -> bool {
        self.legacy_counter || self.discarded_flags || self.chain_dropped || self.counter_clamped
    }
}

pub fn save_cell(cell: &StorageCell, policy: &dyn UpgradePolicy, region: &mut dyn KvRegion) {
    match cell {
        StorageCell::Compacting(ledger) => save_tiered(ledger, region),
        StorageCell::Dense(dense) => save_dense(dense, region),
    }

    region.put(KEY_ECHO_VOID, &[policy.has_overflow_void() as u8]);
    region.put(KEY_ECHO_UP, &[policy.tier_extension_up()]);
    region.put(KEY_ECHO_DOWN, &[policy.tier_extension_down()]);
    region.put(KEY_ECHO_DIST, &[policy.equal_distribution()]);

    for legacy in [LEGACY_STORED_HI, LEGACY_STORED_LO, LEGACY_FULL, LEGACY_EMPTY] {
        region.remove(legacy);
    }
}

fn save_tiered(ledger: &TieredLedger, region: &mut dyn KvRegion) {
    region.put(KEY_STORED, &ledger.stored().to_le_bytes());
    match ledger.chain() {
        Some(chain) => {
            let mut buf = Vec::with_capacity(chain.len() * Tier::SIZE);
            for tier in chain.tiers() {
                buf.extend_from_slice(tier.as_bytes());
            }
            region.put(KEY_TIERS, &buf);
            region.put(KEY_DIGEST, &chain.digest());
            region.put(KEY_MAIN, &(chain.main_index() as u32).to_le_bytes());
        }
        None => {
            region.remove(KEY_TIERS);
            region.remove(KEY_DIGEST);
            region.remove(KEY_MAIN);
        }
    }
    match ledger.identity() {
        Some(identity) => {
            region.put(KEY_MAIN_ID, identity.main.as_bytes());
            region.put(KEY_BASE_ID, identity.base.as_bytes());
        }
        None => {
            region.remove(KEY_MAIN_ID);
            region.remove(KEY_BASE_ID);
        }
    }
}

fn save_dense(dense: &DenseLedger, region: &mut dyn KvRegion) {
    let mut buf = Vec::with_capacity(dense.type_count() * core::mem::size_of::<DenseRecord>());
    for (id, amount) in dense.entries() {
        let record = DenseRecord {
            amount: *amount,
            id: *id,
        };
        buf.extend_from_slice(record.as_bytes());
    }
    region.put(KEY_ENTRIES, &buf);

    let mut filter = Vec::with_capacity(dense.filter().len() * ItemId::SIZE);
    for id in dense.filter() {
        filter.extend_from_slice(id.as_bytes());
    }
    region.put(KEY_FILTER, &filter);
}

/// Rebuild a cell of `kind` from `region`. Policy is applied by the caller.
pub fn load_cell(kind: &CellKind, region: &dyn KvRegion) -> (StorageCell, LoadReport) {
    let mut report = LoadReport::default();
    if region.get(LEGACY_FULL).is_some() || region.get(LEGACY_EMPTY).is_some() {
        report.discarded_flags = true;
    }

    let cell = match kind.layout {
        CellLayout::Compacting => StorageCell::Compacting(load_tiered(kind, region, &mut report)),
        CellLayout::Dense { type_limit } => {
            StorageCell::Dense(load_dense(kind, type_limit, region, &mut report))
        }
    };

    if report.repaired() {
        warn!(kind = %kind.name, report = ?report, "repaired persisted cell state");
    }
    (cell, report)
}

fn load_tiered(kind: &CellKind, region: &dyn KvRegion, report: &mut LoadReport) -> TieredLedger {
    let capacity = kind.capacity_units();

    let stored = match region.get(KEY_STORED).and_then(read_u64) {
        Some(v) => v,
        None => match legacy_counter(region) {
            Some(v) => {
                report.legacy_counter = true;
                v
            }
            None => 0,
        },
    };
    if stored > capacity {
        report.counter_clamped = true;
    }

    let chain = match region.get(KEY_TIERS) {
        Some(bytes) => {
            let decoded = decode_chain(bytes, region.get(KEY_MAIN), region.get(KEY_DIGEST));
            if decoded.is_none() {
                report.chain_dropped = true;
            }
            decoded
        }
        None => None,
    };

    let identity = match chain {
        Some(_) => None,
        None => read_identity(region),
    };
    TieredLedger::restore(capacity, chain, stored).with_identity(identity)
}

fn read_identity(region: &dyn KvRegion) -> Option<CounterIdentity> {
    let main = ItemId::read_from_bytes(region.get(KEY_MAIN_ID)?).ok()?;
    let base = ItemId::read_from_bytes(region.get(KEY_BASE_ID)?).ok()?;
    Some(CounterIdentity { main, base })
}

fn load_dense(
    kind: &CellKind,
    type_limit: usize,
    region: &dyn KvRegion,
    report: &mut LoadReport,
) -> DenseLedger {
    let capacity = kind.capacity_units();
    let mut entries = Vec::new();
    if let Some(bytes) = region.get(KEY_ENTRIES) {
        for chunk in bytes.chunks_exact(core::mem::size_of::<DenseRecord>()) {
            if let Ok(record) = DenseRecord::read_from_bytes(chunk) {
                entries.push((record.id, record.amount));
            }
        }
    }
    let total = entries
        .iter()
        .fold(0u64, |acc, (_, v)| acc.saturating_add(*v));
    if total > capacity {
        report.counter_clamped = true;
    }

    let mut dense = DenseLedger::restore(capacity, type_limit, &entries);
    if let Some(bytes) = region.get(KEY_FILTER) {
        let filter: Vec<ItemId> = bytes
            .chunks_exact(ItemId::SIZE)
            .filter_map(|c| ItemId::read_from_bytes(c).ok())
            .collect();
        dense.set_filter(&filter);
    }
    dense
}

fn decode_chain(
    bytes: &[u8],
    main: Option<&[u8]>,
    digest: Option<&[u8]>,
) -> Option<CompressionChain> {
    if bytes.is_empty() || bytes.len() % Tier::SIZE != 0 {
        return None;
    }
    let tiers: Vec<Tier> = bytes
        .chunks_exact(Tier::SIZE)
        .map(Tier::read_from_bytes)
        .collect::<Result<_, _>>()
        .ok()?;
    let main = match main {
        Some(raw) => read_u32(raw)? as usize,
        None => 0,
    };
    let chain = CompressionChain::new(&tiers, main).ok()?;
    match digest {
        Some(expected) if expected != chain.digest().as_slice() => None,
        _ => Some(chain),
    }
}

fn legacy_counter(region: &dyn KvRegion) -> Option<u64> {
    let hi = region.get(LEGACY_STORED_HI).and_then(read_u32);
    let lo = region.get(LEGACY_STORED_LO).and_then(read_u32);
    match (hi, lo) {
        (None, None) => None,
        (hi, lo) => Some(((hi.unwrap_or(0) as u64) << 32) | lo.unwrap_or(0) as u64),
    }
}

#[inline]
fn read_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

#[inline]
fn read_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::Mode;
    use crate::core::policy::{NoUpgrades, UpgradeCard, UpgradeSet};

    const NUGGET: ItemId = ItemId::new(1, 0);
    const INGOT: ItemId = ItemId::new(2, 0);

    fn kind() -> CellKind {
        CellKind::compacting("c", 1024)
    }

    fn metal() -> CompressionChain {
        CompressionChain::new(&[Tier::new(INGOT, 9), Tier::new(NUGGET, 1)], 0).unwrap()
    }

    #[test]
    fn test_fresh_region_loads_empty_cell() {
        let (cell, report) = load_cell(&kind(), &MemoryRegion::new());
        assert!(cell.is_empty());
        assert!(cell.chain().is_none());
        assert!(!report.repaired());
    }

    #[test]
    fn test_save_then_load_keeps_chain_and_counter() {
        let mut ledger = TieredLedger::new(kind().capacity_units());
        ledger.attach_chain(metal()).unwrap();
        ledger.inject(1, 40, Mode::Commit);
        let cell = StorageCell::Compacting(ledger);

        let mut region = MemoryRegion::new();
        let upgrades = UpgradeSet::from_cards(&[UpgradeCard::OverflowVoid]);
        save_cell(&cell, &upgrades, &mut region);
        assert_eq!(region.get(KEY_STORED), Some(&40u64.to_le_bytes()[..]));
        assert_eq!(region.get(KEY_ECHO_VOID), Some(&[1u8][..]));

        let (loaded, report) = load_cell(&kind(), &region);
        assert!(!report.repaired());
        assert_eq!(loaded.stored(), 40);
        assert_eq!(loaded.chain(), Some(&metal()));
    }

    #[test]
    fn test_legacy_split_counter_and_flags() {
        let mut region = MemoryRegion::new();
        region.put(LEGACY_STORED_HI, &0u32.to_le_bytes());
        region.put(LEGACY_STORED_LO, &77u32.to_le_bytes());
        region.put(LEGACY_FULL, &[1]);
        region.put(LEGACY_EMPTY, &[1]);

        let (cell, report) = load_cell(&kind(), &region);
        assert!(report.legacy_counter);
        assert!(report.discarded_flags);
        assert_eq!(cell.stored(), 77);
        assert!(!cell.is_empty());
        assert!(!cell.is_full());

        save_cell(&cell, &NoUpgrades, &mut region);
        assert!(region.get(LEGACY_FULL).is_none());
        assert!(region.get(LEGACY_STORED_HI).is_none());
        assert_eq!(region.get(KEY_STORED), Some(&77u64.to_le_bytes()[..]));
    }

    #[test]
    fn test_corrupt_chain_is_dropped_counter_kept() {
        let mut ledger = TieredLedger::new(kind().capacity_units());
        ledger.attach_chain(metal()).unwrap();
        ledger.inject(1, 5, Mode::Commit);
        let mut region = MemoryRegion::new();
        save_cell(&StorageCell::Compacting(ledger), &NoUpgrades, &mut region);

        assert_eq!(region.get(KEY_MAIN_ID), Some(INGOT.as_bytes()));
        assert_eq!(region.get(KEY_BASE_ID), Some(NUGGET.as_bytes()));

        region.put(KEY_DIGEST, &[0u8; 32]);
        let (cell, report) = load_cell(&kind(), &region);
        assert!(report.chain_dropped);
        assert!(cell.chain().is_none());
        assert_eq!(cell.stored(), 5);

        let ledger = cell.as_tiered().unwrap();
        assert!(ledger.is_orphaned());
        let identity = ledger.identity().unwrap();
        assert_eq!((identity.main, identity.base), (INGOT, NUGGET));

        // Saving the orphan keeps its identity for the next load.
        let mut resaved = MemoryRegion::new();
        save_cell(&cell, &NoUpgrades, &mut resaved);
        assert!(resaved.get(KEY_TIERS).is_none());
        assert_eq!(resaved.get(KEY_BASE_ID), Some(NUGGET.as_bytes()));

        region.put(KEY_TIERS, &[1, 2, 3]);
        let (_, report) = load_cell(&kind(), &region);
        assert!(report.chain_dropped);
    }

    #[test]
    fn test_counter_clamped_to_capacity() {
        let mut region = MemoryRegion::new();
        region.put(KEY_STORED, &u64::MAX.to_le_bytes());
        let (cell, report) = load_cell(&kind(), &region);
        assert!(report.counter_clamped);
        assert_eq!(cell.stored(), kind().capacity_units());
        assert!(cell.is_full());
    }

    #[test]
    fn test_dense_round_trip() {
        let kind = CellKind::dense("d", 64, 8);
        let mut dense = DenseLedger::new(kind.capacity_units(), 8);
        dense.set_filter(&[NUGGET, INGOT]);
        dense.inject(&NUGGET, 12, Mode::Commit);
        dense.inject(&INGOT, 3, Mode::Commit);

        let mut region = MemoryRegion::new();
        save_cell(&StorageCell::Dense(dense.clone()), &NoUpgrades, &mut region);
        let (loaded, report) = load_cell(&kind, &region);
        assert!(!report.repaired());
        assert_eq!(loaded, StorageCell::Dense(dense));
    }
}
