//! The guts. Arithmetic, chains, ledgers, persistence, batching.

pub mod batch;
pub mod cell;
pub mod chain;
pub mod dense;
pub mod item;
pub mod kernel;
pub mod ledger;
pub mod metrics;
pub mod persist;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod saturating;

pub use batch::{
    BatchCoordinator, ChannelId, FlushReport, FlushToken, LedgerId, NotificationSink,
    PendingChangeSet, PersistTarget, Provenance, SchedulerHook, StepScheduler,
};
pub use cell::{CellInventory, StorageCell};
pub use chain::{ChainError, CompressionChain, Tier, Tiers, MAX_CHAIN_TIERS};
pub use dense::DenseLedger;
pub use item::{ItemId, ItemStack};
pub use kernel::{AttachError, CellSummary, Kernel, KernelConfig, KernelError, TierLine};
pub use ledger::{
    CounterIdentity, CrossTierDelta, Extraction, Injection, Mode, PartitionDenied, TierChange,
    TieredLedger,
};
pub use metrics::{FlushMetrics, LedgerMetrics, MetricsSnapshot};
pub use persist::{load_cell, save_cell, KvRegion, LoadReport, MemoryRegion};
pub use policy::{NoUpgrades, UpgradeCard, UpgradePolicy, UpgradeSet, DEFAULT_TIER_DEPTH};
pub use registry::{CellKind, CellLayout, Registry, RegistryBuilder, RegistryError};
pub use resolver::{ChainResolver, RecipeOracle, Step};
