//! Lineage-keyed result cache.
//!
//! The cache-wide mutex is only held for short get, put, or remove calls and
//! during eviction. All blocking of threads waiting for the value of a
//! placeholder happens on the individual entry objects, which keeps long
//! computations from stalling unrelated lookups and avoids deadlocks when a
//! function body itself goes through the cache.

mod config;
mod entry;
mod error;
mod eviction;
mod lru;
mod spill;
mod stats;

pub use config::{CacheConfig, ReuseMode};
pub use entry::{CacheEntry, CacheStatus};
pub use error::CacheError;
pub use spill::{DiskSpeeds, SPILL_DIR_ENV};
pub use stats::{CacheStatistics, StatsSnapshot};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::data::{Data, MatrixBlock, ValueKind};
use crate::runtime::context::ExecutionContext;
use crate::runtime::instruction::ComputationInstruction;
use crate::runtime::lineage::{contains_rand_data_gen, LineageItem, LineageKey, ReuseRewriter};

use lru::LruList;
use spill::SpillRecord;

/// Name and shape of one function output, for the multi-output protocol.
#[derive(Debug, Clone)]
pub struct OutputBinding {
    pub name: String,
    pub kind: ValueKind,
}

impl OutputBinding {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Everything the cache-wide mutex protects.
pub(crate) struct CacheInner {
    pub(crate) entries: HashMap<LineageKey, u32>,
    pub(crate) lru: LruList,
    pub(crate) spilled: HashMap<LineageKey, SpillRecord>,
    pub(crate) removed: HashSet<LineageKey>,
    pub(crate) bytes: u64,
    pub(crate) spill_dir: Option<PathBuf>,
    pub(crate) speeds: DiskSpeeds,
}

/// Shared result cache for deterministic computations, keyed by lineage.
///
/// One instance is created at runtime startup and handed to every worker;
/// execution contexts stay thread-local.
pub struct LineageCache {
    inner: Mutex<CacheInner>,
    limit: u64,
    config: CacheConfig,
    stats: CacheStatistics,
    rewriter: Option<Arc<dyn ReuseRewriter>>,
}

impl LineageCache {
    pub fn new(config: CacheConfig) -> Self {
        let limit = config.resolve_limit();
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                lru: LruList::new(),
                spilled: HashMap::new(),
                removed: HashSet::new(),
                bytes: 0,
                spill_dir: None,
                speeds: DiskSpeeds::default(),
            }),
            limit,
            config,
            stats: CacheStatistics::default(),
            rewriter: None,
        }
    }

    /// Cache with a compensation-plan rewriter for partial reuse.
    pub fn with_rewriter(config: CacheConfig, rewriter: Arc<dyn ReuseRewriter>) -> Self {
        let mut cache = Self::new(config);
        cache.rewriter = Some(rewriter);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn cache_bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current bandwidth estimates.
    pub fn disk_speeds(&self) -> DiskSpeeds {
        self.inner.lock().speeds
    }

    /// Resident keys in recency order, most recent first.
    pub fn resident_keys(&self) -> Vec<LineageKey> {
        self.inner.lock().lru.keys_head_to_tail()
    }

    pub fn spilled_keys(&self) -> Vec<LineageKey> {
        self.inner.lock().spilled.keys().cloned().collect()
    }

    /// Probe before executing an instruction: on a hit the output is bound
    /// from the cache (blocking on a placeholder if the producer is still
    /// running) and `true` is returned; on a miss a placeholder is installed
    /// so racing threads wait for this computation instead of repeating it.
    pub fn try_reuse(
        &self,
        inst: &ComputationInstruction,
        ec: &mut ExecutionContext,
    ) -> Result<bool, CacheError> {
        if self.config.reuse_mode.is_none() || !inst.reuse_eligible() {
            return Ok(false);
        }
        let key = inst.lineage_item(ec);

        let mut inner = self.inner.lock();
        let mut hit = None;
        if self.config.reuse_mode.full_enabled() && inner.contains(&key) {
            hit = Some(inner.fetch(&key, self.limit, &self.config, &self.stats)?);
        }
        if hit.is_none() && self.config.reuse_mode.partial_enabled() {
            if let Some(rewriter) = self.rewriter.clone() {
                // The rewriter goes through the public API itself; run it
                // with the cache lock released, then re-probe atomically.
                drop(inner);
                let rewritten = rewriter.execute_rewrites(self, inst, ec);
                inner = self.inner.lock();
                if rewritten && inner.contains(&key) {
                    hit = Some(inner.fetch(&key, self.limit, &self.config, &self.stats)?);
                }
            }
        }
        let Some(entry) = hit else {
            // No reuse: install a placeholder so concurrent threads block on
            // this computation instead of racing it.
            if self.marked_for_caching(inst, ec) {
                let placeholder = CacheEntry::placeholder(key, inst.output_kind());
                inner.install(placeholder, &self.stats);
            }
            return Ok(false);
        };
        drop(inner);

        // Blocking happens with the cache lock released.
        match inst.output_kind() {
            ValueKind::Matrix => match entry.block_for_matrix() {
                Ok(block) => ec.set_matrix_output(inst.output(), block),
                Err(CacheError::Dropped { .. }) => return Ok(false),
                Err(err) => return Err(err),
            },
            ValueKind::Scalar => match entry.block_for_scalar() {
                Ok(value) => ec.set_scalar_output(inst.output(), value),
                Err(CacheError::Dropped { .. }) => return Ok(false),
                Err(err) => return Err(err),
            },
        }
        self.stats.record_inst_hit();
        Ok(true)
    }

    /// Fill the placeholder for an executed instruction with its matrix
    /// output, or admit it fresh if no placeholder was installed.
    pub fn put_matrix(
        &self,
        inst: &ComputationInstruction,
        ec: &ExecutionContext,
        compute_time_ns: u64,
    ) -> Result<(), CacheError> {
        if self.config.reuse_mode.is_none() || !inst.reuse_eligible() {
            return Ok(());
        }
        let key = inst.lineage_item(ec);
        match ec.variable(inst.output()) {
            Some(Data::Matrix(block)) => {
                self.admit(key, Data::Matrix(block.clone()), compute_time_ns)
            }
            Some(Data::Scalar(_)) => {
                self.drop_placeholder(&key);
                Err(CacheError::KindMismatch {
                    id: key.id(),
                    expected: "matrix",
                })
            }
            None => {
                self.drop_placeholder(&key);
                Err(CacheError::UnboundOutput {
                    name: inst.output().to_string(),
                })
            }
        }
    }

    /// Generic form of [`put_matrix`](Self::put_matrix) covering matrix and
    /// scalar outputs.
    pub fn put_value(
        &self,
        inst: &ComputationInstruction,
        ec: &ExecutionContext,
        compute_time_ns: u64,
    ) -> Result<(), CacheError> {
        if self.config.reuse_mode.is_none() || !inst.reuse_eligible() {
            return Ok(());
        }
        let key = inst.lineage_item(ec);
        match ec.variable(inst.output()) {
            Some(data) => self.admit(key, data.clone(), compute_time_ns),
            None => {
                // The producer failed to bind its output; do not leave
                // waiters parked on the placeholder.
                self.drop_placeholder(&key);
                Err(CacheError::UnboundOutput {
                    name: inst.output().to_string(),
                })
            }
        }
    }

    /// Non-binding presence check; may race with eviction.
    pub fn probe(&self, key: &LineageKey) -> bool {
        let inner = self.inner.lock();
        let present = inner.contains(key);
        if !present && self.config.statistics && inner.removed.contains(key) {
            // The sought entry was cached once but has been removed since.
            self.stats.record_del_hit();
        }
        present
    }

    /// Blocking lookup of a matrix value, reloading from spill if needed.
    pub fn get_matrix(&self, key: &LineageKey) -> Result<Arc<MatrixBlock>, CacheError> {
        let entry = {
            let mut inner = self.inner.lock();
            inner.fetch(key, self.limit, &self.config, &self.stats)?
        };
        entry.block_for_matrix()
    }

    /// Probe all `k` outputs of a function call. Either every output is
    /// served from the cache (bound into `ec` with its lineage rewired to
    /// the original producer) and `true` is returned, or placeholders are
    /// installed for the missing outputs and the call must execute.
    pub fn try_reuse_multi(
        &self,
        outputs: &[OutputBinding],
        li_inputs: &[LineageKey],
        func_name: &str,
        ec: &mut ExecutionContext,
    ) -> Result<bool, CacheError> {
        if !self.config.reuse_mode.multi_level_enabled() || outputs.is_empty() {
            return Ok(false);
        }

        let mut reuse = true;
        let mut hits = Vec::with_capacity(outputs.len());
        for (i, output) in outputs.iter().enumerate() {
            let li = LineageItem::node(format!("{func_name}{}", i + 1), li_inputs.to_vec());
            let mut inner = self.inner.lock();
            if inner.contains(&li) {
                let entry = inner.fetch(&li, self.limit, &self.config, &self.stats)?;
                hits.push((output.name.clone(), entry, li));
            } else {
                let placeholder = CacheEntry::placeholder(li, output.kind);
                inner.install(placeholder, &self.stats);
                // One miss forces execution, but every output still needs
                // its placeholder, so keep probing.
                reuse = false;
            }
        }
        if !reuse {
            return Ok(false);
        }

        // Collect every value first (blocking outside the lock); the symbol
        // table is only touched once all outputs are in hand.
        let mut bound = Vec::with_capacity(hits.len());
        for (name, entry, li) in hits {
            let data = match entry.kind() {
                ValueKind::Matrix => match entry.block_for_matrix() {
                    Ok(block) => Data::Matrix(block),
                    Err(CacheError::Dropped { .. }) => return Ok(false),
                    Err(err) => return Err(err),
                },
                ValueKind::Scalar => match entry.block_for_scalar() {
                    Ok(value) => Data::Scalar(value),
                    Err(CacheError::Dropped { .. }) => return Ok(false),
                    Err(err) => return Err(err),
                },
            };
            let origin = entry.origin().unwrap_or(li);
            bound.push((name, data, origin));
        }
        for (name, data, origin) in bound {
            if let Some(old) = ec.remove_variable(&name) {
                if !old.same_object(&data) {
                    ec.cleanup_data(old);
                }
            }
            ec.set_variable(name.clone(), data);
            ec.set_lineage(name, origin);
        }
        self.stats.record_func_hit();
        Ok(true)
    }

    /// Commit the outputs of an executed function call: move every computed
    /// value into its placeholder, or remove every placeholder this call
    /// installed. Never a partial commit — binding some outputs from cache
    /// and recomputing the rest could diverge on side-effecting lineage.
    pub fn put_value_multi(
        &self,
        outputs: &[OutputBinding],
        li_inputs: &[LineageKey],
        func_name: &str,
        ec: &ExecutionContext,
        compute_time_ns: u64,
    ) -> Result<(), CacheError> {
        if !self.config.reuse_mode.multi_level_enabled() {
            return Ok(());
        }

        let boundary: HashSet<LineageKey> = li_inputs.iter().cloned().collect();
        let mut keys = Vec::with_capacity(outputs.len());
        let mut moves = Vec::with_capacity(outputs.len());
        let mut all_cacheable = true;
        for (i, output) in outputs.iter().enumerate() {
            let li = LineageItem::node(format!("{func_name}{}", i + 1), li_inputs.to_vec());
            match ec.lineage_of(&output.name) {
                Some(bound) if !contains_rand_data_gen(&boundary, bound) => {
                    moves.push((li.clone(), bound.clone()));
                }
                _ => all_cacheable = false,
            }
            keys.push(li);
        }

        let mut inner = self.inner.lock();
        if all_cacheable {
            for (li, bound) in &moves {
                if !inner.contains(li) || !inner.source_filled(bound) {
                    all_cacheable = false;
                    break;
                }
            }
        }
        let mut moved = Vec::new();
        let mut failure = None;
        if all_cacheable {
            for (li, bound) in &moves {
                match inner.move_into_placeholder(
                    li,
                    bound,
                    compute_time_ns,
                    self.limit,
                    &self.config,
                    &self.stats,
                ) {
                    Ok(MoveOutcome::Moved) => moved.push(li.clone()),
                    Ok(MoveOutcome::AlreadyCached) => {}
                    Ok(MoveOutcome::NotCacheable) => {
                        all_cacheable = false;
                        break;
                    }
                    Err(err) => {
                        failure = Some(err);
                        all_cacheable = false;
                        break;
                    }
                }
            }
        }
        if !all_cacheable {
            // Unwind only what this call touched: moves it performed and
            // placeholders it installed. Outputs committed by earlier calls
            // stay cached.
            for li in &moved {
                inner.remove_key(li, &self.config, &self.stats, true);
            }
            for li in &keys {
                inner.remove_if_placeholder(li, &self.config, &self.stats);
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Clear every structure back to its initial empty state. Outstanding
    /// placeholder waiters are woken with a failure; spill files are
    /// orphaned intentionally.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        for &idx in inner.entries.values() {
            inner.lru.entry(idx).abort();
        }
        inner.entries.clear();
        inner.lru.clear();
        inner.spilled.clear();
        inner.removed.clear();
        inner.bytes = 0;
        inner.spill_dir = None;
    }

    fn marked_for_caching(&self, inst: &ComputationInstruction, ec: &ExecutionContext) -> bool {
        if !self.config.comp_assume_read_write {
            return true;
        }
        if inst.output_kind() == ValueKind::Matrix {
            // Partial reuse applies even to loop-dependent operations, so
            // the mark is only required under plain full reuse.
            !(self.config.reuse_mode == ReuseMode::Full && !ec.is_marked(inst.output()))
        } else {
            true
        }
    }

    fn admit(&self, key: LineageKey, data: Data, compute_time_ns: u64) -> Result<(), CacheError> {
        let size = data_size(&data);
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.entries.get(&key).copied() {
            let entry = inner.lru.entry(idx).clone();
            if !entry.is_placeholder() {
                // A racing producer filled the entry first.
                return Ok(());
            }
            if entry.kind() != data.kind() {
                inner.remove_slot(idx, &self.config, &self.stats, true);
                return Err(CacheError::KindMismatch {
                    id: key.id(),
                    expected: match entry.kind() {
                        ValueKind::Matrix => "matrix",
                        ValueKind::Scalar => "scalar",
                    },
                });
            }
            let admitted = if size > self.limit {
                false
            } else {
                inner.make_space(size, self.limit, &self.config, &self.stats)?;
                inner.fits(size, self.limit)
            };
            if admitted {
                entry.fill(data, compute_time_ns, None);
                inner.bytes += size;
            } else {
                // Deliver the value to any waiters, then discard the entry:
                // a negative admission decision, not an error.
                let entry = inner.remove_slot(idx, &self.config, &self.stats, false);
                entry.fill(data, compute_time_ns, None);
                self.stats.record_rejection();
                debug!(id = key.id(), size, "value rejected for size");
            }
        } else {
            let admitted = if size > self.limit {
                false
            } else {
                inner.make_space(size, self.limit, &self.config, &self.stats)?;
                inner.fits(size, self.limit)
            };
            if !admitted {
                self.stats.record_rejection();
                debug!(id = key.id(), size, "value rejected for size");
                return Ok(());
            }
            let entry = CacheEntry::with_value(key, data, compute_time_ns, CacheStatus::Cached);
            inner.install(entry, &self.stats);
            inner.bytes += size;
        }
        Ok(())
    }

    /// Remove a placeholder whose producer cannot deliver, waking waiters.
    fn drop_placeholder(&self, key: &LineageKey) {
        let mut inner = self.inner.lock();
        inner.remove_key(key, &self.config, &self.stats, true);
    }
}

impl CacheInner {
    pub(crate) fn contains(&self, key: &LineageKey) -> bool {
        self.entries.contains_key(key) || self.spilled.contains_key(key)
    }

    /// Look up an entry, bumping its recency; a spilled entry is read back
    /// in and re-admitted at the head.
    pub(crate) fn fetch(
        &mut self,
        key: &LineageKey,
        limit: u64,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        if let Some(idx) = self.entries.get(key).copied() {
            self.lru.touch(idx);
            stats.record_mem_hit();
            return Ok(self.lru.entry(idx).clone());
        }
        self.reload(key, limit, config, stats)
    }

    fn reload(
        &mut self,
        key: &LineageKey,
        limit: u64,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let Some(record) = self.spilled.remove(key) else {
            return Err(CacheError::Missing { id: key.id() });
        };
        let (block, secs) = spill::read_block(&record.path)?;
        spill::remove_file(&record.path);
        let block = Arc::new(block);

        let size_mb = block.on_disk_size() as f64 / spill::MB;
        self.speeds
            .observe_read(block.sparse_on_disk(), size_mb, secs, config.min_spill_data_mb);
        stats.record_fs_hit();
        debug!(id = key.id(), size_mb, "reloaded matrix from spill");

        let entry = CacheEntry::with_value(
            key.clone(),
            Data::Matrix(block),
            record.compute_time_ns,
            CacheStatus::Reloaded,
        );
        let size = entry.size();
        let admitted = if size > limit {
            false
        } else {
            self.make_space(size, limit, config, stats)?;
            self.fits(size, limit)
        };
        if admitted {
            self.install(entry.clone(), stats);
            self.bytes += size;
        } else {
            // Hand the value to the caller uncached.
            stats.record_rejection();
        }
        Ok(entry)
    }

    /// Link a new entry at the head and index it.
    pub(crate) fn install(&mut self, entry: Arc<CacheEntry>, stats: &CacheStatistics) -> u32 {
        let key = entry.key().clone();
        let idx = self.lru.push_head(entry);
        self.entries.insert(key, idx);
        stats.record_mem_write();
        idx
    }

    /// Unlink a slot from the map and list, deducting its footprint.
    pub(crate) fn remove_slot(
        &mut self,
        idx: u32,
        config: &CacheConfig,
        stats: &CacheStatistics,
        wake: bool,
    ) -> Arc<CacheEntry> {
        let entry = self.lru.unlink(idx);
        self.entries.remove(entry.key());
        self.bytes = self.bytes.saturating_sub(entry.size());
        if config.statistics {
            self.removed.insert(entry.key().clone());
        }
        stats.record_mem_delete();
        if wake {
            entry.abort();
        }
        entry
    }

    pub(crate) fn remove_key(
        &mut self,
        key: &LineageKey,
        config: &CacheConfig,
        stats: &CacheStatistics,
        wake: bool,
    ) {
        if let Some(idx) = self.entries.get(key).copied() {
            self.remove_slot(idx, config, stats, wake);
        }
    }

    /// Whether `key` resolves to an actual value (in memory or on disk).
    fn source_filled(&self, key: &LineageKey) -> bool {
        if let Some(idx) = self.entries.get(key).copied() {
            !self.lru.entry(idx).is_placeholder()
        } else {
            self.spilled.contains_key(key)
        }
    }

    /// Remove `key` only if it is still an unfilled placeholder, waking
    /// its waiters.
    fn remove_if_placeholder(
        &mut self,
        key: &LineageKey,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) {
        if let Some(idx) = self.entries.get(key).copied() {
            if self.lru.entry(idx).is_placeholder() {
                self.remove_slot(idx, config, stats, true);
            }
        }
    }

    /// Move the value cached under `bound` into the placeholder at `li`,
    /// recording `bound` as the origin for lineage rewiring.
    fn move_into_placeholder(
        &mut self,
        li: &LineageKey,
        bound: &LineageKey,
        compute_time_ns: u64,
        limit: u64,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<MoveOutcome, CacheError> {
        if !self.contains(bound) {
            return Ok(MoveOutcome::NotCacheable);
        }
        let source = self.fetch(bound, limit, config, stats)?;
        let Some(idx) = self.entries.get(li).copied() else {
            return Ok(MoveOutcome::NotCacheable);
        };
        let placeholder = self.lru.entry(idx).clone();
        if !placeholder.is_placeholder() {
            // An earlier call already committed this output; its bytes are
            // already accounted.
            return Ok(MoveOutcome::AlreadyCached);
        }
        let data = match source.kind() {
            ValueKind::Matrix => source.matrix_if_filled().map(Data::Matrix),
            ValueKind::Scalar => source.scalar_if_filled().map(Data::Scalar),
        };
        let Some(data) = data else {
            return Ok(MoveOutcome::NotCacheable);
        };
        if placeholder.kind() != data.kind() {
            return Err(CacheError::KindMismatch {
                id: li.id(),
                expected: match placeholder.kind() {
                    ValueKind::Matrix => "matrix",
                    ValueKind::Scalar => "scalar",
                },
            });
        }
        let size = data_size(&data);
        let admitted = if size > limit {
            false
        } else {
            self.make_space(size, limit, config, stats)?;
            self.fits(size, limit)
        };
        if !admitted {
            stats.record_rejection();
            return Ok(MoveOutcome::NotCacheable);
        }
        if !placeholder.fill(data, compute_time_ns, Some(bound.clone())) {
            return Ok(MoveOutcome::NotCacheable);
        }
        self.bytes += size;
        Ok(MoveOutcome::Moved)
    }
}

/// How one output resolved during a multi-output commit.
enum MoveOutcome {
    /// Placeholder filled and accounted.
    Moved,
    /// An earlier call already committed this output; nothing to do.
    AlreadyCached,
    /// The value could not be cached; the commit must unwind.
    NotCacheable,
}

fn data_size(data: &Data) -> u64 {
    match data {
        Data::Matrix(block) => block.in_memory_size(),
        Data::Scalar(value) => value.size(),
    }
}
