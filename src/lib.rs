#![deny(unsafe_op_in_unsafe_fn)]

pub mod core;

/// Prelude for convenient imports of primary API types.
pub mod prelude {
    pub use crate::core::{
        CellInventory, CellKind, ChainResolver, CompressionChain, CrossTierDelta, ItemId,
        ItemStack, Kernel, KernelConfig, KvRegion, MemoryRegion, Mode, NotificationSink,
        Provenance, RecipeOracle, Registry, RegistryBuilder, StorageCell, TieredLedger,
        UpgradeCard, UpgradeSet,
    };
}

// Re-export primary types at crate root for convenience.
pub use crate::core::{
    AttachError, BatchCoordinator, CellInventory, CellKind, ChainError, ChainResolver,
    CompressionChain, CrossTierDelta, DenseLedger, Extraction, Injection, ItemId, ItemStack,
    Kernel, KernelConfig, KernelError, KvRegion, LoadReport, MemoryRegion, Mode,
    NotificationSink, PartitionDenied, Provenance, RecipeOracle, Registry, RegistryBuilder,
    StepScheduler, StorageCell, Tier, TieredLedger, UpgradeCard, UpgradePolicy, UpgradeSet,
};
