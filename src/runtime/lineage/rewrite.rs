//! Hook for compensation-plan based partial reuse.

use crate::runtime::cache::LineageCache;
use crate::runtime::context::ExecutionContext;
use crate::runtime::instruction::ComputationInstruction;

/// Rewrites an instruction into a cheaper compensation plan whose result is
/// assembled from already-cached intermediates.
///
/// The cache invokes this with its own lock released; a rewriter is expected
/// to insert the compensated value under `inst`'s lineage key (through the
/// public put API) and return `true`, after which the cache re-probes.
pub trait ReuseRewriter: Send + Sync {
    fn execute_rewrites(
        &self,
        cache: &LineageCache,
        inst: &ComputationInstruction,
        ec: &mut ExecutionContext,
    ) -> bool;
}
