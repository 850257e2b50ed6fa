//! lattice: a matrix dataflow runtime with a lineage-keyed reuse cache.
//!
//! Before executing a deterministic instruction, the runtime probes the
//! cache with the instruction's lineage fingerprint; a hit binds the
//! previously computed value, a miss installs a placeholder so racing
//! threads block on one computation instead of repeating it. Admission is
//! guarded by a cost-based eviction policy that chooses, per cold entry,
//! between deletion and spilling to local disk.

pub mod data;
pub mod runtime;

pub use data::{Data, MatrixBlock, ScalarValue, ValueKind};
pub use runtime::cache::{
    CacheConfig, CacheError, CacheStatus, DiskSpeeds, LineageCache, OutputBinding, ReuseMode,
    StatsSnapshot,
};
pub use runtime::context::ExecutionContext;
pub use runtime::instruction::ComputationInstruction;
pub use runtime::lineage::{LineageItem, LineageKey, ReuseRewriter};
