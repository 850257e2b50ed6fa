//! Hit/miss/write counters. Observability only; no effect on correctness.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStatistics {
    mem_hits: AtomicU64,
    fs_hits: AtomicU64,
    del_hits: AtomicU64,
    inst_hits: AtomicU64,
    func_hits: AtomicU64,
    mem_writes: AtomicU64,
    fs_writes: AtomicU64,
    mem_deletes: AtomicU64,
    rejections: AtomicU64,
}

impl CacheStatistics {
    pub(crate) fn record_mem_hit(&self) {
        self.mem_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fs_hit(&self) {
        self.fs_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_del_hit(&self) {
        self.del_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inst_hit(&self) {
        self.inst_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_func_hit(&self) {
        self.func_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mem_write(&self) {
        self.mem_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fs_write(&self) {
        self.fs_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mem_delete(&self) {
        self.mem_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            mem_hits: self.mem_hits.load(Ordering::Relaxed),
            fs_hits: self.fs_hits.load(Ordering::Relaxed),
            del_hits: self.del_hits.load(Ordering::Relaxed),
            inst_hits: self.inst_hits.load(Ordering::Relaxed),
            func_hits: self.func_hits.load(Ordering::Relaxed),
            mem_writes: self.mem_writes.load(Ordering::Relaxed),
            fs_writes: self.fs_writes.load(Ordering::Relaxed),
            mem_deletes: self.mem_deletes.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Probes answered from the in-memory map.
    pub mem_hits: u64,
    /// Probes answered by reloading a spilled entry.
    pub fs_hits: u64,
    /// Probes for keys that were cached once but removed since.
    pub del_hits: u64,
    /// Instruction-level reuses (value bound without executing).
    pub inst_hits: u64,
    /// Function-level reuses (every output bound without executing).
    pub func_hits: u64,
    /// Entries admitted to the in-memory map.
    pub mem_writes: u64,
    /// Matrices written to spill files.
    pub fs_writes: u64,
    /// Entries deleted from the in-memory map.
    pub mem_deletes: u64,
    /// Admissions refused for size.
    pub rejections: u64,
}
