//! Step batching. Many mutations per step → one persist + one notification
//! per ledger, at step end.
//!
//! Flow: ledger op → `mark_dirty` / `queue_cross_tier_delta` → the first one
//! in a step registers a single end-of-step callback → the scheduler fires it
//! → `on_end_of_step` → `flush_all`. Detaching a cell mid-step calls
//! `flush_one` so nothing outlives its ledger.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use super::item::ItemId;
use super::ledger::CrossTierDelta;
use super::metrics::FlushMetrics;

pub type LedgerId = u64;
pub type ChannelId = u32;

/// Identifies one end-of-step registration. A newer token from the same
/// owner supersedes older ones; a superseded token firing is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlushToken {
    pub owner: u32,
    pub serial: u64,
}

/// Host scheduler. Fires each owner's latest token once, at the end of the
/// current step, before the next step begins.
pub trait SchedulerHook {
    fn register_end_of_step(&mut self, token: FlushToken);
}

/// Step scheduler for hosts that don't bring their own.
#[derive(Debug, Default)]
pub struct StepScheduler {
    step: u64,
    due: BTreeMap<u32, FlushToken>,
}

impl StepScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn is_idle(&self) -> bool {
        self.due.is_empty()
    }

    /// End the current step: hand back every live token, advance.
    pub fn end_step(&mut self) -> Vec<FlushToken> {
        self.step += 1;
        std::mem::take(&mut self.due).into_values().collect()
    }
}

impl SchedulerHook for StepScheduler {
    fn register_end_of_step(&mut self, token: FlushToken) {
        self.due.insert(token.owner, token);
    }
}

/// Where a notification came from. Cross-tier provenances are fresh on every
/// emission and never equal to any other provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// The host's ordinary single-slot acknowledgment for `ledger`.
    ///
    /// The coordinator never emits this. Hosts that route their own slot
    /// acknowledgments through the same [`NotificationSink`] tag them with it,
    /// so a sink can tell the two paths apart.
    Slot { ledger: LedgerId },
    /// A merged cross-tier update.
    CrossTier { serial: u64 },
}

/// Receives merged change lists.
pub trait NotificationSink {
    fn notify(&mut self, channel: ChannelId, changes: &[(ItemId, i128)], provenance: Provenance);
}

/// Writes one ledger's state to its backing store.
pub trait PersistTarget {
    /// False when the ledger is gone; the write is skipped.
    fn persist(&mut self, ledger: LedgerId) -> bool;
}

/// Merged per-ledger changes for the current step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChangeSet {
    pub channel: ChannelId,
    pub dirty: bool,
    pub deltas: BTreeMap<ItemId, i128>,
}

impl PendingChangeSet {
    /// Deltas with net-zero entries removed.
    pub fn merged(&self) -> Vec<(ItemId, i128)> {
        self.deltas
            .iter()
            .filter(|(_, d)| **d != 0)
            .map(|(id, d)| (*id, *d))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub persisted: usize,
    pub notified: usize,
}

#[derive(Debug)]
pub struct BatchCoordinator {
    owner: u32,
    pending: HashMap<LedgerId, PendingChangeSet>,
    registered: Option<FlushToken>,
    next_serial: u64,
    next_provenance: u64,
    sink_warned: bool,
    metrics: FlushMetrics,
}

impl BatchCoordinator {
    pub fn new(owner: u32) -> Self {
        Self {
            owner,
            pending: HashMap::new(),
            registered: None,
            next_serial: 0,
            next_provenance: 0,
            sink_warned: false,
            metrics: FlushMetrics::new(),
        }
    }

    #[inline(always)]
    pub fn metrics(&self) -> &FlushMetrics {
        &self.metrics
    }

    #[inline(always)]
    pub fn registered(&self) -> Option<FlushToken> {
        self.registered
    }

    pub fn is_pending(&self, ledger: LedgerId) -> bool {
        self.pending.contains_key(&ledger)
    }

    pub fn pending(&self, ledger: LedgerId) -> Option<&PendingChangeSet> {
        self.pending.get(&ledger)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ledger needs persisting at step end.
    pub fn mark_dirty(&mut self, ledger: LedgerId, channel: ChannelId, hook: &mut dyn SchedulerHook) {
        self.slot(ledger, channel).dirty = true;
        self.ensure_registered(hook);
    }

    /// Fold a cross-tier delta into the ledger's pending set.
    pub fn queue_cross_tier_delta(
        &mut self,
        ledger: LedgerId,
        channel: ChannelId,
        delta: &CrossTierDelta,
        hook: &mut dyn SchedulerHook,
    ) {
        if delta.is_empty() {
            return;
        }
        let slot = self.slot(ledger, channel);
        for change in delta.changes() {
            let entry = slot.deltas.entry(change.id).or_insert(0);
            *entry = entry.saturating_add(change.delta());
        }
        self.ensure_registered(hook);
    }

    fn slot(&mut self, ledger: LedgerId, channel: ChannelId) -> &mut PendingChangeSet {
        let slot = self.pending.entry(ledger).or_default();
        slot.channel = channel;
        slot
    }

    fn ensure_registered(&mut self, hook: &mut dyn SchedulerHook) {
        if self.registered.is_some() {
            return;
        }
        self.next_serial += 1;
        let token = FlushToken {
            owner: self.owner,
            serial: self.next_serial,
        };
        hook.register_end_of_step(token);
        self.registered = Some(token);
        self.metrics.record_registration();
    }

    /// Scheduler callback. Tokens other than the live registration are stale.
    pub fn on_end_of_step(
        &mut self,
        token: FlushToken,
        target: &mut dyn PersistTarget,
        sink: Option<&mut (dyn NotificationSink + '_)>,
    ) -> FlushReport {
        if self.registered != Some(token) {
            self.metrics.record_stale_callback();
            return FlushReport::default();
        }
        self.flush_all(target, sink)
    }

    /// Persist every dirty ledger once, then emit one merged notification per
    /// ledger with a non-zero delta.
    pub fn flush_all(
        &mut self,
        target: &mut dyn PersistTarget,
        sink: Option<&mut (dyn NotificationSink + '_)>,
    ) -> FlushReport {
        self.registered = None;
        if self.pending.is_empty() {
            return FlushReport::default();
        }

        let mut batch: Vec<(LedgerId, PendingChangeSet)> = self.pending.drain().collect();
        batch.sort_unstable_by_key(|(id, _)| *id);

        let report = self.execute(&batch, target, sink);
        self.metrics
            .record_flush(false, report.persisted as u64, report.notified as u64);
        debug!(
            ledgers = batch.len(),
            persisted = report.persisted,
            notified = report.notified,
            "flushed step batch"
        );
        report
    }

    /// Run one ledger's pending work now and forget it.
    pub fn flush_one(
        &mut self,
        ledger: LedgerId,
        target: &mut dyn PersistTarget,
        sink: Option<&mut (dyn NotificationSink + '_)>,
    ) -> FlushReport {
        let set = match self.pending.remove(&ledger) {
            Some(set) => set,
            None => return FlushReport::default(),
        };
        let report = self.execute(&[(ledger, set)], target, sink);
        self.metrics
            .record_flush(true, report.persisted as u64, report.notified as u64);
        report
    }

    fn execute(
        &mut self,
        batch: &[(LedgerId, PendingChangeSet)],
        target: &mut dyn PersistTarget,
        mut sink: Option<&mut (dyn NotificationSink + '_)>,
    ) -> FlushReport {
        let mut report = FlushReport::default();

        for (id, set) in batch {
            if set.dirty && target.persist(*id) {
                report.persisted += 1;
            }
        }

        for (_, set) in batch {
            let merged = set.merged();
            if merged.is_empty() {
                continue;
            }
            match sink.as_deref_mut() {
                Some(sink) => {
                    self.next_provenance += 1;
                    let provenance = Provenance::CrossTier {
                        serial: self.next_provenance,
                    };
                    sink.notify(set.channel, &merged, provenance);
                    report.notified += 1;
                }
                None => {
                    if !self.sink_warned {
                        self.sink_warned = true;
                        warn!("no notification sink attached; cross-tier updates are dropped");
                    }
                }
            }
        }

        report
    }
}
