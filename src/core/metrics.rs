//! Lightweight metrics. No allocations, no locks, just atomics.

use core::sync::atomic::{AtomicU64, Ordering};

/// Ledger traffic. All counters are monotonic.
#[derive(Debug)]
pub struct LedgerMetrics {
    pub injects: AtomicU64,
    pub extracts: AtomicU64,
    pub accepted_units: AtomicU64,
    pub voided_units: AtomicU64,
    pub rejected_units: AtomicU64,
    pub extracted_units: AtomicU64,
    pub partitions: AtomicU64,
    pub partition_denials: AtomicU64,
}

impl LedgerMetrics {
    pub const fn new() -> Self {
        Self {
            injects: AtomicU64::new(0),
            extracts: AtomicU64::new(0),
            accepted_units: AtomicU64::new(0),
            voided_units: AtomicU64::new(0),
            rejected_units: AtomicU64::new(0),
            extracted_units: AtomicU64::new(0),
            partitions: AtomicU64::new(0),
            partition_denials: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn record_inject(&self, accepted: u64, voided: u64, rejected: u64) {
        self.injects.fetch_add(1, Ordering::Relaxed);
        add(&self.accepted_units, accepted);
        add(&self.voided_units, voided);
        add(&self.rejected_units, rejected);
    }

    #[inline(always)]
    pub fn record_extract(&self, extracted: u64) {
        self.extracts.fetch_add(1, Ordering::Relaxed);
        add(&self.extracted_units, extracted);
    }

    #[inline(always)]
    pub fn record_partition(&self) {
        self.partitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_partition_denied(&self) {
        self.partition_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn voided_units(&self) -> u64 {
        self.voided_units.load(Ordering::Relaxed)
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Batching and flush activity.
#[derive(Debug)]
pub struct FlushMetrics {
    pub flushes: AtomicU64,
    pub forced_flushes: AtomicU64,
    pub ledgers_persisted: AtomicU64,
    pub notifications: AtomicU64,
    pub registrations: AtomicU64,
    pub stale_callbacks: AtomicU64,
}

impl FlushMetrics {
    pub const fn new() -> Self {
        Self {
            flushes: AtomicU64::new(0),
            forced_flushes: AtomicU64::new(0),
            ledgers_persisted: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            stale_callbacks: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn record_flush(&self, forced: bool, persisted: u64, notified: u64) {
        if forced {
            self.forced_flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        self.ledgers_persisted.fetch_add(persisted, Ordering::Relaxed);
        self.notifications.fetch_add(notified, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_stale_callback(&self) {
        self.stale_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    pub fn ledgers_persisted(&self) -> u64 {
        self.ledgers_persisted.load(Ordering::Relaxed)
    }

    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

impl Default for FlushMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit totals are u64 and can legitimately reach the top of the range.
#[inline(always)]
fn add(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_add(n))
    });
}

/// Immutable snapshot for export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub injects: u64,
    pub extracts: u64,
    pub accepted_units: u64,
    pub voided_units: u64,
    pub rejected_units: u64,
    pub extracted_units: u64,
    pub partitions: u64,
    pub partition_denials: u64,
    pub flushes: u64,
    pub forced_flushes: u64,
    pub ledgers_persisted: u64,
    pub notifications: u64,
    pub registrations: u64,
    pub stale_callbacks: u64,
}

impl MetricsSnapshot {
    pub fn capture(ledger: &LedgerMetrics, flush: &FlushMetrics) -> Self {
        let r = |a: &AtomicU64| a.load(Ordering::Relaxed);
        Self {
            injects: r(&ledger.injects),
            extracts: r(&ledger.extracts),
            accepted_units: r(&ledger.accepted_units),
            voided_units: r(&ledger.voided_units),
            rejected_units: r(&ledger.rejected_units),
            extracted_units: r(&ledger.extracted_units),
            partitions: r(&ledger.partitions),
            partition_denials: r(&ledger.partition_denials),
            flushes: r(&flush.flushes),
            forced_flushes: r(&flush.forced_flushes),
            ledgers_persisted: r(&flush.ledgers_persisted),
            notifications: r(&flush.notifications),
            registrations: r(&flush.registrations),
            stale_callbacks: r(&flush.stale_callbacks),
        }
    }

    /// Prometheus text exposition. Every field is a counter.
    pub fn render_prometheus(&self, prefix: &str) -> String {
        let rows: [(&str, u64, &str); 14] = [
            ("injects_total", self.injects, "Inject operations"),
            ("extracts_total", self.extracts, "Extract operations"),
            ("accepted_units_total", self.accepted_units, "Tier units accepted"),
            ("voided_units_total", self.voided_units, "Tier units destroyed by overflow void"),
            ("rejected_units_total", self.rejected_units, "Tier units returned to callers"),
            ("extracted_units_total", self.extracted_units, "Tier units extracted"),
            ("partitions_total", self.partitions, "Successful partitions"),
            ("partition_denials_total", self.partition_denials, "Partitions refused on non-empty cells"),
            ("flushes_total", self.flushes, "End-of-step flush passes"),
            ("forced_flushes_total", self.forced_flushes, "Forced single-ledger flushes"),
            ("ledgers_persisted_total", self.ledgers_persisted, "Ledger persistence writes"),
            ("notifications_total", self.notifications, "Merged cross-tier notifications"),
            ("registrations_total", self.registrations, "End-of-step registrations"),
            ("stale_callbacks_total", self.stale_callbacks, "Superseded callbacks ignored"),
        ];

        let mut out = String::with_capacity(2048);
        for (name, value, help) in rows {
            out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
            out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
            out.push_str(&format!("{prefix}_{name} {value}\n"));
        }
        out
    }
}
