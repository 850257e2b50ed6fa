use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use lattice::{
    CacheConfig, ComputationInstruction, ExecutionContext, LineageCache, MatrixBlock, ReuseMode,
    ReuseRewriter, ValueKind,
};

/// Rewriter that assembles the requested result from cheaper pieces and
/// publishes it under the instruction's own lineage key.
struct CompensationRewriter {
    invoked: AtomicBool,
}

impl CompensationRewriter {
    fn new() -> Self {
        Self {
            invoked: AtomicBool::new(false),
        }
    }
}

impl ReuseRewriter for CompensationRewriter {
    fn execute_rewrites(
        &self,
        cache: &LineageCache,
        inst: &ComputationInstruction,
        ec: &mut ExecutionContext,
    ) -> bool {
        self.invoked.store(true, Ordering::SeqCst);
        ec.set_matrix_output(inst.output(), Arc::new(MatrixBlock::filled(4, 4, 2.0)));
        cache.put_value(inst, ec, 1_000_000).is_ok()
    }
}

fn config(mode: ReuseMode, dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        reuse_mode: mode,
        cache_limit_bytes: Some(1 << 20),
        spill_dir: Some(dir.to_path_buf()),
        ..CacheConfig::default()
    }
}

#[test]
fn a_successful_rewrite_turns_the_miss_into_a_hit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rewriter = Arc::new(CompensationRewriter::new());
    let cache =
        LineageCache::with_rewriter(config(ReuseMode::FullPartial, dir.path()), rewriter.clone());

    let inst = ComputationInstruction::new(
        "rightIndex",
        vec!["X".to_string()],
        "out",
        ValueKind::Matrix,
    );
    let mut ec = ExecutionContext::new();
    assert!(cache.try_reuse(&inst, &mut ec)?);
    assert!(rewriter.invoked.load(Ordering::SeqCst));
    assert_eq!(ec.matrix("out").expect("bound by rewrite").get(0, 0), 2.0);
    assert_eq!(cache.stats().inst_hits, 1);
    Ok(())
}

#[test]
fn the_rewriter_stays_silent_outside_partial_modes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rewriter = Arc::new(CompensationRewriter::new());
    let cache = LineageCache::with_rewriter(config(ReuseMode::Full, dir.path()), rewriter.clone());

    let inst = ComputationInstruction::new(
        "rightIndex",
        vec!["X".to_string()],
        "out",
        ValueKind::Matrix,
    );
    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse(&inst, &mut ec)?);
    assert!(!rewriter.invoked.load(Ordering::SeqCst));
    Ok(())
}
