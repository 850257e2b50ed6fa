// Runtime: execution contexts, instructions, lineage, and the reuse cache.
pub mod cache;
pub mod context;
pub mod instruction;
pub mod lineage;

pub use cache::LineageCache;
pub use context::ExecutionContext;
pub use instruction::ComputationInstruction;
