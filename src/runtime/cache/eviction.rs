//! Cost-based eviction: walk the LRU from the cold end, deciding per entry
//! whether to skip, delete, or spill.

use std::sync::Arc;

use tracing::debug;

use crate::data::ValueKind;
use crate::runtime::cache::config::CacheConfig;
use crate::runtime::cache::entry::CacheEntry;
use crate::runtime::cache::error::CacheError;
use crate::runtime::cache::lru::NIL;
use crate::runtime::cache::spill::{self, SpillRecord, MB};
use crate::runtime::cache::stats::CacheStatistics;
use crate::runtime::cache::CacheInner;

impl CacheInner {
    pub(crate) fn fits(&self, needed: u64, limit: u64) -> bool {
        self.bytes + needed <= limit
    }

    /// Free room for `needed` bytes, spilling or deleting cold entries.
    ///
    /// Runs under the cache lock. May leave the budget unsatisfied when the
    /// remaining entries are placeholders; the caller then rejects the
    /// admission. Reloaded entries consume their second chance on the first
    /// pass, so a follow-up pass can still evict them.
    pub(crate) fn make_space(
        &mut self,
        needed: u64,
        limit: u64,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<(), CacheError> {
        loop {
            let downgraded = self.eviction_pass(needed, limit, config, stats)?;
            if self.fits(needed, limit) || !downgraded {
                return Ok(());
            }
        }
    }

    fn eviction_pass(
        &mut self,
        needed: u64,
        limit: u64,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<bool, CacheError> {
        let mut downgraded = false;
        let mut cur = self.lru.tail();
        while cur != NIL {
            if self.fits(needed, limit) {
                break;
            }
            let prev = self.lru.prev(cur);
            let entry = self.lru.entry(cur).clone();

            if !entry.status().can_evict() {
                cur = prev;
                continue;
            }

            if !config.spill_enabled {
                self.remove_slot(cur, config, stats, false);
                cur = prev;
                continue;
            }

            if entry.take_second_chance() {
                downgraded = true;
                cur = prev;
                continue;
            }

            let exec_ms = entry.compute_time_ns() as f64 / 1_000_000.0;
            let min_ms = config.min_spill_time_ms as f64;

            match entry.kind() {
                ValueKind::Scalar => {
                    // Costly scalars are often function outputs; keep them
                    // resident rather than spill.
                    if exec_ms < min_ms {
                        self.remove_slot(cur, config, stats, false);
                    }
                }
                ValueKind::Matrix => {
                    let to_spill = match entry.matrix_if_filled() {
                        Some(block) => {
                            let size_mb = block.on_disk_size() as f64 / MB;
                            let spill_ms =
                                self.speeds.round_trip_secs(size_mb, block.sparse_on_disk()) * 1000.0;
                            if spill_ms < min_ms {
                                // Estimate below the resolution floor; trust
                                // only the recomputation cost.
                                exec_ms >= min_ms
                            } else {
                                exec_ms > spill_ms
                            }
                        }
                        None => false,
                    };
                    if to_spill {
                        if let Err(err) = self.spill_entry(&entry, config, stats) {
                            self.remove_slot(cur, config, stats, false);
                            return Err(err);
                        }
                    }
                    self.remove_slot(cur, config, stats, false);
                }
            }
            cur = prev;
        }
        Ok(downgraded)
    }

    fn spill_entry(
        &mut self,
        entry: &Arc<CacheEntry>,
        config: &CacheConfig,
        stats: &CacheStatistics,
    ) -> Result<(), CacheError> {
        if entry.kind() != ValueKind::Matrix {
            return Err(CacheError::SpillUnsupported {
                id: entry.key().id(),
                kind: "scalar",
            });
        }
        let block = entry
            .matrix_if_filled()
            .ok_or(CacheError::SpillUnsupported {
                id: entry.key().id(),
                kind: "placeholder",
            })?;

        let dir = match &self.spill_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = spill::create_spill_dir(config.spill_dir.as_deref())?;
                self.spill_dir = Some(dir.clone());
                dir
            }
        };
        let path = dir.join(entry.key().id().to_string());
        let secs = spill::write_block(&path, &block)?;

        let size_mb = block.on_disk_size() as f64 / MB;
        self.speeds
            .observe_write(block.sparse_on_disk(), size_mb, secs, config.min_spill_data_mb);
        stats.record_fs_write();
        debug!(id = entry.key().id(), size_mb, "spilled matrix to disk");

        self.spilled.insert(
            entry.key().clone(),
            SpillRecord {
                path,
                compute_time_ns: entry.compute_time_ns(),
            },
        );
        Ok(())
    }
}
