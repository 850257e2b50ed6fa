use std::sync::Arc;

use anyhow::Result;
use lattice::{
    CacheConfig, ComputationInstruction, ExecutionContext, LineageCache, LineageItem, LineageKey,
    MatrixBlock, OutputBinding, ReuseMode, ScalarValue, ValueKind,
};

// 16x16 dense block: 32 bytes of header + 256 cells
const BLOCK_BYTES: u64 = 32 + 256 * 8;

fn block(value: f64) -> Arc<MatrixBlock> {
    Arc::new(MatrixBlock::filled(16, 16, value))
}

fn multilevel_config(dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        reuse_mode: ReuseMode::Multilevel,
        cache_limit_bytes: Some(1 << 20),
        spill_dir: Some(dir.to_path_buf()),
        ..CacheConfig::default()
    }
}

fn outputs() -> [OutputBinding; 2] {
    [
        OutputBinding::new("o1", ValueKind::Matrix),
        OutputBinding::new("o2", ValueKind::Scalar),
    ]
}

/// The function body: one matrix op and one scalar op, each going through
/// the instruction-level reuse path like any other computation. Lineage is
/// traced for every instruction, reused or not.
fn run_function(cache: &LineageCache, ec: &mut ExecutionContext) -> Result<()> {
    let i1 = ComputationInstruction::new("tsmm", vec!["A".to_string()], "o1", ValueKind::Matrix);
    if !cache.try_reuse(&i1, ec)? {
        ec.set_matrix_output("o1", block(5.0));
        cache.put_value(&i1, ec, 300_000_000)?;
    }
    ec.trace_instruction(&i1);
    let i2 = ComputationInstruction::new("sum", vec!["o1".to_string()], "o2", ValueKind::Scalar);
    if !cache.try_reuse(&i2, ec)? {
        ec.set_scalar_output("o2", ScalarValue::F64(1280.0));
        cache.put_value(&i2, ec, 200_000_000)?;
    }
    ec.trace_instruction(&i2);
    Ok(())
}

/// A call site of `f` that binds only the first output, priming the cache
/// with a committed `f1` entry.
fn commit_first_output(cache: &LineageCache, li_inputs: &[LineageKey]) -> Result<()> {
    let first_only = [OutputBinding::new("o1", ValueKind::Matrix)];
    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&first_only, li_inputs, "f", &mut ec)?);
    let i1 = ComputationInstruction::new("tsmm", vec!["A".to_string()], "o1", ValueKind::Matrix);
    assert!(!cache.try_reuse(&i1, &mut ec)?);
    ec.set_matrix_output("o1", block(5.0));
    cache.put_value(&i1, &ec, 300_000_000)?;
    ec.trace_instruction(&i1);
    cache.put_value_multi(&first_only, li_inputs, "f", &ec, 300_000_000)?;
    Ok(())
}

#[test]
fn a_second_call_binds_every_output_and_rewires_lineage() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let outs = outputs();
    let li_inputs = [LineageItem::leaf("A")];

    let mut ec1 = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&outs, &li_inputs, "f", &mut ec1)?);
    run_function(&cache, &mut ec1)?;
    cache.put_value_multi(&outs, &li_inputs, "f", &ec1, 500_000_000)?;

    let mut ec2 = ExecutionContext::new();
    assert!(cache.try_reuse_multi(&outs, &li_inputs, "f", &mut ec2)?);

    let o1 = ec2.matrix("o1").expect("matrix output bound");
    assert_eq!(o1.get(0, 0), 5.0);
    assert_eq!(ec2.scalar("o2"), Some(ScalarValue::F64(1280.0)));

    // lineage points at the original producers, not the function keys
    let orig_o1 = LineageItem::node("tsmm", vec![LineageItem::leaf("A")]);
    assert_eq!(
        ec2.lineage_of("o1").expect("lineage rewired").as_ref(),
        orig_o1.as_ref()
    );
    assert_eq!(cache.stats().func_hits, 1);
    Ok(())
}

#[test]
fn a_tainted_output_prevents_caching_any_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let outs = outputs();
    let li_inputs = [LineageItem::leaf("A")];

    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&outs, &li_inputs, "g", &mut ec)?);

    // o1 is a clean deterministic output
    let i1 = ComputationInstruction::new("tsmm", vec!["A".to_string()], "o1", ValueKind::Matrix);
    assert!(!cache.try_reuse(&i1, &mut ec)?);
    ec.set_matrix_output("o1", block(5.0));
    ec.trace_instruction(&i1);
    cache.put_value(&i1, &ec, 300_000_000)?;

    // o2 comes from a data generator
    let i2 = ComputationInstruction::new("rand", vec![], "o2", ValueKind::Scalar);
    assert!(!cache.try_reuse(&i2, &mut ec)?);
    ec.set_scalar_output("o2", ScalarValue::F64(0.42));
    ec.trace_instruction(&i2);
    cache.put_value(&i2, &ec, 10_000_000)?;

    cache.put_value_multi(&outs, &li_inputs, "g", &ec, 500_000_000)?;

    // neither function key was committed
    let key1 = LineageItem::node("g1", li_inputs.to_vec());
    let key2 = LineageItem::node("g2", li_inputs.to_vec());
    assert!(!cache.probe(&key1));
    assert!(!cache.probe(&key2));

    // so the next call must execute again
    let mut ec2 = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&outs, &li_inputs, "g", &mut ec2)?);
    Ok(())
}

#[test]
fn a_previously_committed_output_counts_once_when_siblings_miss() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let li_inputs = [LineageItem::leaf("A")];
    commit_first_output(&cache, &li_inputs)?;

    // a second call site binds both outputs: the first hits, the second
    // misses, and the call executes
    let both = outputs();
    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&both, &li_inputs, "f", &mut ec)?);
    run_function(&cache, &mut ec)?;
    cache.put_value_multi(&both, &li_inputs, "f", &ec, 200_000_000)?;

    assert!(cache.probe(&LineageItem::node("f1", li_inputs.to_vec())));
    assert!(cache.probe(&LineageItem::node("f2", li_inputs.to_vec())));
    // two matrices (producer + f1) and two scalars (producer + f2), each
    // counted exactly once
    assert_eq!(cache.cache_bytes(), 2 * BLOCK_BYTES + 2 * 16);

    let mut ec3 = ExecutionContext::new();
    assert!(cache.try_reuse_multi(&both, &li_inputs, "f", &mut ec3)?);
    assert_eq!(ec3.matrix("o1").expect("o1 bound").get(0, 0), 5.0);
    assert_eq!(ec3.scalar("o2"), Some(ScalarValue::F64(1280.0)));
    Ok(())
}

#[test]
fn an_abort_spares_outputs_cached_by_earlier_calls() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let li_inputs = [LineageItem::leaf("A")];
    commit_first_output(&cache, &li_inputs)?;

    // the two-output call re-executes and produces a tainted second output
    let both = outputs();
    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&both, &li_inputs, "f", &mut ec)?);
    let i1 = ComputationInstruction::new("tsmm", vec!["A".to_string()], "o1", ValueKind::Matrix);
    assert!(cache.try_reuse(&i1, &mut ec)?);
    ec.trace_instruction(&i1);
    let i2 = ComputationInstruction::new("rand", vec![], "o2", ValueKind::Scalar);
    assert!(!cache.try_reuse(&i2, &mut ec)?);
    ec.set_scalar_output("o2", ScalarValue::F64(0.7));
    cache.put_value(&i2, &ec, 10_000_000)?;
    ec.trace_instruction(&i2);
    cache.put_value_multi(&both, &li_inputs, "f", &ec, 200_000_000)?;

    // only the placeholder installed by this call is gone
    assert!(cache.probe(&LineageItem::node("f1", li_inputs.to_vec())));
    assert!(!cache.probe(&LineageItem::node("f2", li_inputs.to_vec())));

    // the single-output call still reuses the surviving entry
    let mut ec3 = ExecutionContext::new();
    let first_only = [OutputBinding::new("o1", ValueKind::Matrix)];
    assert!(cache.try_reuse_multi(&first_only, &li_inputs, "f", &mut ec3)?);
    assert_eq!(ec3.matrix("o1").expect("o1 bound").get(0, 0), 5.0);
    Ok(())
}

#[test]
fn a_missing_bound_lineage_aborts_the_whole_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let outs = outputs();
    let li_inputs = [LineageItem::leaf("A")];

    let mut ec = ExecutionContext::new();
    assert!(!cache.try_reuse_multi(&outs, &li_inputs, "h", &mut ec)?);

    // only o1 is produced and traced; o2 never gets a lineage
    let i1 = ComputationInstruction::new("tsmm", vec!["A".to_string()], "o1", ValueKind::Matrix);
    assert!(!cache.try_reuse(&i1, &mut ec)?);
    ec.set_matrix_output("o1", block(5.0));
    ec.trace_instruction(&i1);
    cache.put_value(&i1, &ec, 300_000_000)?;

    cache.put_value_multi(&outs, &li_inputs, "h", &ec, 500_000_000)?;

    assert!(!cache.probe(&LineageItem::node("h1", li_inputs.to_vec())));
    assert!(!cache.probe(&LineageItem::node("h2", li_inputs.to_vec())));
    Ok(())
}

#[test]
fn commit_without_probe_is_a_no_op() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = LineageCache::new(multilevel_config(dir.path()));
    let ec = ExecutionContext::new();

    // no placeholders were ever installed for this call
    cache.put_value_multi(&outputs(), &[LineageItem::leaf("A")], "f", &ec, 1_000_000)?;
    assert!(cache.resident_keys().is_empty());
    Ok(())
}

#[test]
fn multi_level_reuse_requires_its_mode_and_some_outputs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let full_only = LineageCache::new(CacheConfig {
        reuse_mode: ReuseMode::Full,
        ..multilevel_config(dir.path())
    });
    let mut ec = ExecutionContext::new();
    let li_inputs = [LineageItem::leaf("A")];
    assert!(!full_only.try_reuse_multi(&outputs(), &li_inputs, "f", &mut ec)?);
    assert!(full_only.resident_keys().is_empty());

    let multilevel = LineageCache::new(multilevel_config(dir.path()));
    assert!(!multilevel.try_reuse_multi(&[], &li_inputs, "f", &mut ec)?);
    assert!(multilevel.resident_keys().is_empty());
    Ok(())
}
