//! Cell hosting. Attach → partition → insert/extract → end_step → detach.
//!
//! The kernel owns every attached cell, the chain resolver, the batch
//! coordinator and the step scheduler. Mutations mark cells dirty; nothing is
//! written or announced until the step ends (or the cell is detached).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::batch::{
    BatchCoordinator, ChannelId, FlushReport, FlushToken, LedgerId, NotificationSink,
    PersistTarget, StepScheduler,
};
use super::cell::{CellInventory, StorageCell};
use super::chain::CompressionChain;
use super::item::ItemId;
use super::ledger::{Extraction, Injection, Mode, PartitionDenied, TieredLedger};
use super::metrics::{LedgerMetrics, MetricsSnapshot};
use super::persist::{load_cell, save_cell, KvRegion, LoadReport};
use super::policy::UpgradeSet;
use super::registry::{CellKind, CellLayout, Registry};
use super::resolver::{ChainResolver, RecipeOracle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("no cell kind registered under that name")]
    UnknownKind,
    #[error("ledger {0} is already attached")]
    AlreadyAttached(LedgerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("ledger {0} is not attached")]
    UnknownCell(LedgerId),
    #[error("ledger {0} is not a compacting cell")]
    NotCompacting(LedgerId),
    #[error("ledger {0} is not a dense cell")]
    NotDense(LedgerId),
    #[error(transparent)]
    Partition(#[from] PartitionDenied),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// First commit insert into an unpartitioned cell partitions it.
    pub implicit_partition: bool,
    /// Channel new cells notify on.
    pub notify_channel_default: ChannelId,
    /// Scheduler owner id for this kernel's flush registrations.
    pub owner: u32,
}

impl KernelConfig {
    pub const DEFAULT_IMPLICIT_PARTITION: bool = true;
    pub const DEFAULT_NOTIFY_CHANNEL: ChannelId = 0;
    pub const DEFAULT_OWNER: u32 = 1;
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            implicit_partition: Self::DEFAULT_IMPLICIT_PARTITION,
            notify_channel_default: Self::DEFAULT_NOTIFY_CHANNEL,
            owner: Self::DEFAULT_OWNER,
        }
    }
}

struct Slot {
    kind: CellKind,
    cell: StorageCell,
    region: Box<dyn KvRegion>,
    upgrades: UpgradeSet,
    channel: ChannelId,
}

/// Writes slots back to their regions during a flush.
struct SlotWriter<'a> {
    slots: &'a mut HashMap<LedgerId, Slot>,
}

impl PersistTarget for SlotWriter<'_> {
    fn persist(&mut self, ledger: LedgerId) -> bool {
        match self.slots.get_mut(&ledger) {
            Some(slot) => {
                save_cell(&slot.cell, &slot.upgrades, slot.region.as_mut());
                true
            }
            None => false,
        }
    }
}

fn as_sink<N: NotificationSink>(sink: &mut Option<N>) -> Option<&mut dyn NotificationSink> {
    sink.as_mut().map(|s| s as &mut dyn NotificationSink)
}

/// Resolve `item`, or fall back to a one-tier chain when there is no oracle.
fn chain_for<O: RecipeOracle>(
    resolver: Option<&ChainResolver<O>>,
    oracle_warned: &mut bool,
    ledger: &mut TieredLedger,
    item: &ItemId,
) -> Result<(), PartitionDenied> {
    match resolver {
        Some(resolver) => ledger.partition(item, resolver),
        None => {
            if !*oracle_warned {
                *oracle_warned = true;
                warn!("no recipe oracle available; cells partition to single-tier chains");
            }
            ledger.check_partition(item)?;
            ledger.attach_chain(CompressionChain::single(*item))
        }
    }
}

pub struct Kernel<O: RecipeOracle, N: NotificationSink> {
    registry: Arc<Registry>,
    config: KernelConfig,
    resolver: Option<ChainResolver<O>>,
    sink: Option<N>,
    slots: HashMap<LedgerId, Slot>,
    coordinator: BatchCoordinator,
    scheduler: StepScheduler,
    metrics: LedgerMetrics,
    oracle_warned: bool,
}

impl<O: RecipeOracle, N: NotificationSink> Kernel<O, N> {
    pub fn new(registry: Arc<Registry>, oracle: Option<O>, sink: Option<N>) -> Self {
        Self::with_config(registry, oracle, sink, KernelConfig::default())
    }

    pub fn with_config(
        registry: Arc<Registry>,
        oracle: Option<O>,
        sink: Option<N>,
        config: KernelConfig,
    ) -> Self {
        Self {
            registry,
            config,
            resolver: oracle.map(ChainResolver::new),
            sink,
            slots: HashMap::new(),
            coordinator: BatchCoordinator::new(config.owner),
            scheduler: StepScheduler::new(),
            metrics: LedgerMetrics::new(),
            oracle_warned: false,
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline(always)]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sink(&self) -> Option<&N> {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> Option<&mut N> {
        self.sink.as_mut()
    }

    #[inline(always)]
    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    #[inline(always)]
    pub fn step(&self) -> u64 {
        self.scheduler.step()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::capture(&self.metrics, self.coordinator.metrics())
    }

    pub fn is_attached(&self, id: LedgerId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn cell(&self, id: LedgerId) -> Option<&StorageCell> {
        self.slots.get(&id).map(|s| &s.cell)
    }

    /// Load a cell of `kind` from `region` and host it under `id`.
    pub fn attach(
        &mut self,
        id: LedgerId,
        kind: &str,
        region: Box<dyn KvRegion>,
        upgrades: UpgradeSet,
    ) -> Result<LoadReport, AttachError> {
        if self.slots.contains_key(&id) {
            return Err(AttachError::AlreadyAttached(id));
        }
        let kind = self.registry.kind(kind).cloned().ok_or(AttachError::UnknownKind)?;

        let (mut cell, mut report) = load_cell(&kind, region.as_ref());
        cell.apply_policy(&upgrades);
        if let Some(ledger) = cell.as_tiered_mut() {
            report.chain_rebuilt = self.rebuild_orphan(id, ledger);
        }
        info!(ledger = id, kind = %kind.name, stored = cell.stored(), "attached cell");

        let channel = self.config.notify_channel_default;
        self.slots.insert(
            id,
            Slot {
                kind,
                cell,
                region,
                upgrades,
                channel,
            },
        );
        if report.chain_rebuilt {
            self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
        }
        Ok(report)
    }

    /// Re-resolve the chain of an orphaned counter from its recorded main.
    /// Only a chain over the recorded base is accepted.
    fn rebuild_orphan(&mut self, id: LedgerId, ledger: &mut TieredLedger) -> bool {
        let identity = match ledger.identity() {
            Some(identity) if ledger.is_orphaned() => identity,
            _ => return false,
        };
        match chain_for(
            self.resolver.as_ref(),
            &mut self.oracle_warned,
            ledger,
            &identity.main,
        ) {
            Ok(()) => {
                info!(ledger = id, main = %identity.main, "rebuilt dropped chain");
                true
            }
            Err(denied) => {
                self.metrics.record_partition_denied();
                warn!(ledger = id, error = %denied, "dropped chain could not be rebuilt; cell needs an explicit partition");
                false
            }
        }
    }

    /// Flush the cell's pending work now, then hand its region back.
    pub fn detach(&mut self, id: LedgerId) -> Result<Box<dyn KvRegion>, KernelError> {
        if !self.slots.contains_key(&id) {
            return Err(KernelError::UnknownCell(id));
        }
        self.coordinator.flush_one(
            id,
            &mut SlotWriter {
                slots: &mut self.slots,
            },
            as_sink(&mut self.sink),
        );
        let slot = self.slots.remove(&id).ok_or(KernelError::UnknownCell(id))?;
        info!(ledger = id, kind = %slot.kind.name, stored = slot.cell.stored(), "detached cell");
        Ok(slot.region)
    }

    pub fn set_channel(&mut self, id: LedgerId, channel: ChannelId) -> Result<(), KernelError> {
        self.slot_mut(id)?.channel = channel;
        Ok(())
    }

    /// Bind a compacting cell to `item`'s chain.
    pub fn partition(&mut self, id: LedgerId, item: &ItemId) -> Result<(), KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        let ledger = slot.cell.as_tiered_mut().ok_or(KernelError::NotCompacting(id))?;

        let before = ledger.chain().map(|c| c.digest());
        if let Err(denied) = chain_for(self.resolver.as_ref(), &mut self.oracle_warned, ledger, item) {
            self.metrics.record_partition_denied();
            return Err(denied.into());
        }
        let after = ledger.chain().map(|c| c.digest());

        if before != after {
            self.metrics.record_partition();
            info!(
                ledger = id,
                main = %item,
                tiers = ledger.chain().map(|c| c.len()).unwrap_or(0),
                "partitioned cell"
            );
            let channel = slot.channel;
            self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
        }
        Ok(())
    }

    /// Set a dense cell's accepted identities.
    pub fn set_filter(&mut self, id: LedgerId, filter: &[ItemId]) -> Result<(), KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        match &mut slot.cell {
            StorageCell::Dense(dense) => dense.set_filter(filter),
            StorageCell::Compacting(_) => return Err(KernelError::NotDense(id)),
        }
        let channel = slot.channel;
        self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
        Ok(())
    }

    /// Insert `units` of `item`. An unpartitioned compacting cell partitions
    /// to `item` first when implicit partitioning is on.
    pub fn insert(
        &mut self,
        id: LedgerId,
        item: &ItemId,
        units: u64,
        mode: Mode,
    ) -> Result<Injection, KernelError> {
        let implicit = self.config.implicit_partition;
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;

        // An orphaned counter is never adopted implicitly.
        let needs_partition = implicit
            && slot
                .cell
                .as_tiered()
                .is_some_and(|l| !l.is_partitioned() && l.is_empty());

        if needs_partition {
            if mode.is_commit() {
                self.partition(id, item)?;
            } else {
                let mut probe = match slot.cell.as_tiered() {
                    Some(l) => l.clone(),
                    None => return Err(KernelError::NotCompacting(id)),
                };
                chain_for(self.resolver.as_ref(), &mut self.oracle_warned, &mut probe, item)?;
                return Ok(probe.inject_item(item, units, Mode::Simulate));
            }
        }

        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        let out = slot.cell.inject(item, units, mode);
        if mode.is_commit() {
            self.metrics.record_inject(out.accepted, out.voided, out.rejected);
            if out.accepted > 0 {
                let channel = slot.channel;
                self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
                self.coordinator
                    .queue_cross_tier_delta(id, channel, &out.changes, &mut self.scheduler);
            }
        }
        Ok(out)
    }

    pub fn extract(
        &mut self,
        id: LedgerId,
        item: &ItemId,
        units: u64,
        mode: Mode,
    ) -> Result<Extraction, KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        let out = slot.cell.extract(item, units, mode);
        if mode.is_commit() {
            self.metrics.record_extract(out.extracted);
            if out.extracted > 0 {
                let channel = slot.channel;
                self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
                self.coordinator
                    .queue_cross_tier_delta(id, channel, &out.changes, &mut self.scheduler);
            }
        }
        Ok(out)
    }

    /// Insert by tier index. Compacting cells only.
    pub fn insert_at(
        &mut self,
        id: LedgerId,
        tier: usize,
        units: u64,
        mode: Mode,
    ) -> Result<Injection, KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        let ledger = slot.cell.as_tiered_mut().ok_or(KernelError::NotCompacting(id))?;
        let out = ledger.inject(tier, units, mode);
        if mode.is_commit() {
            self.metrics.record_inject(out.accepted, out.voided, out.rejected);
            if out.accepted > 0 {
                let channel = slot.channel;
                self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
                self.coordinator
                    .queue_cross_tier_delta(id, channel, &out.changes, &mut self.scheduler);
            }
        }
        Ok(out)
    }

    /// Extract by tier index. Compacting cells only.
    pub fn extract_at(
        &mut self,
        id: LedgerId,
        tier: usize,
        units: u64,
        mode: Mode,
    ) -> Result<Extraction, KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        let ledger = slot.cell.as_tiered_mut().ok_or(KernelError::NotCompacting(id))?;
        let out = ledger.extract(tier, units, mode);
        if mode.is_commit() {
            self.metrics.record_extract(out.extracted);
            if out.extracted > 0 {
                let channel = slot.channel;
                self.coordinator.mark_dirty(id, channel, &mut self.scheduler);
                self.coordinator
                    .queue_cross_tier_delta(id, channel, &out.changes, &mut self.scheduler);
            }
        }
        Ok(out)
    }

    pub fn available(&self, id: LedgerId, item: &ItemId) -> Result<u64, KernelError> {
        Ok(self.slot(id)?.cell.available(item))
    }

    /// Replace the cell's installed cards. An empty partitioned cell
    /// re-resolves its chain with the new depths.
    pub fn apply_upgrades(&mut self, id: LedgerId, upgrades: UpgradeSet) -> Result<(), KernelError> {
        let slot = self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))?;
        slot.upgrades = upgrades;
        slot.cell.apply_policy(&slot.upgrades);

        let repartition = slot
            .cell
            .as_tiered()
            .filter(|l| l.is_empty())
            .and_then(|l| l.chain())
            .map(|c| c.main().id);
        let channel = slot.channel;
        self.coordinator.mark_dirty(id, channel, &mut self.scheduler);

        if let Some(main) = repartition {
            self.partition(id, &main)?;
        }
        Ok(())
    }

    /// Close the step: run every due flush.
    pub fn end_step(&mut self) -> FlushReport {
        let mut total = FlushReport::default();
        for token in self.scheduler.end_step() {
            let report = self.on_end_of_step(token);
            total.persisted += report.persisted;
            total.notified += report.notified;
        }
        total
    }

    /// Entry point for hosts that fire tokens themselves.
    pub fn on_end_of_step(&mut self, token: FlushToken) -> FlushReport {
        self.coordinator.on_end_of_step(
            token,
            &mut SlotWriter {
                slots: &mut self.slots,
            },
            as_sink(&mut self.sink),
        )
    }

    /// Flush everything pending right now.
    pub fn flush(&mut self) -> FlushReport {
        self.coordinator.flush_all(
            &mut SlotWriter {
                slots: &mut self.slots,
            },
            as_sink(&mut self.sink),
        )
    }

    pub fn bytes_used(&self, id: LedgerId) -> Result<u64, KernelError> {
        let slot = self.slot(id)?;
        Ok(slot.kind.bytes_used(slot.cell.stored()))
    }

    pub fn describe(&self, id: LedgerId) -> Result<CellSummary, KernelError> {
        let slot = self.slot(id)?;
        let tiers: Vec<TierLine> = match &slot.cell {
            StorageCell::Compacting(l) => l
                .chain()
                .map(|c| {
                    c.tiers()
                        .iter()
                        .enumerate()
                        .map(|(t, tier)| TierLine {
                            id: tier.id,
                            rate: tier.rate,
                            available: l.available(t),
                            capacity: l.capacity_at(t),
                            main: t == c.main_index(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            StorageCell::Dense(d) => d
                .entries()
                .map(|(id, amount)| TierLine {
                    id: *id,
                    rate: 1,
                    available: *amount,
                    capacity: d.per_type_capacity(),
                    main: false,
                })
                .collect(),
        };
        Ok(CellSummary {
            ledger: id,
            kind: slot.kind.name.clone(),
            dense: matches!(slot.kind.layout, CellLayout::Dense { .. }),
            stored: slot.cell.stored(),
            capacity: slot.cell.capacity(),
            bytes_used: slot.kind.bytes_used(slot.cell.stored()),
            bytes_total: slot.kind.bytes,
            tiers,
        })
    }

    fn slot(&self, id: LedgerId) -> Result<&Slot, KernelError> {
        self.slots.get(&id).ok_or(KernelError::UnknownCell(id))
    }

    fn slot_mut(&mut self, id: LedgerId) -> Result<&mut Slot, KernelError> {
        self.slots.get_mut(&id).ok_or(KernelError::UnknownCell(id))
    }
}

/// One row of a cell summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLine {
    pub id: ItemId,
    pub rate: u64,
    pub available: u64,
    pub capacity: u64,
    pub main: bool,
}

/// Human-readable cell state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSummary {
    pub ledger: LedgerId,
    pub kind: String,
    pub dense: bool,
    pub stored: u64,
    pub capacity: u64,
    pub bytes_used: u64,
    pub bytes_total: u64,
    pub tiers: Vec<TierLine>,
}

impl fmt::Display for CellSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ledger {} [{}] {}/{} bytes, {}/{} units",
            self.ledger, self.kind, self.bytes_used, self.bytes_total, self.stored, self.capacity
        )?;
        for line in &self.tiers {
            let marker = if line.main { "*" } else { " " };
            writeln!(
                f,
                " {marker} {} x{}: {}/{}",
                line.id, line.rate, line.available, line.capacity
            )?;
        }
        Ok(())
    }
}
