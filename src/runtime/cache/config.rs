//! Cache configuration facade.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Which reuse paths are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseMode {
    /// Cache disabled entirely.
    None,
    /// Exact lineage hits only.
    Full,
    /// Compensation-plan rewrites only.
    Partial,
    /// Exact hits plus compensation-plan rewrites.
    FullPartial,
    /// Exact hits plus the multi-output function protocol.
    Multilevel,
}

impl ReuseMode {
    pub fn is_none(self) -> bool {
        self == ReuseMode::None
    }

    pub fn full_enabled(self) -> bool {
        matches!(
            self,
            ReuseMode::Full | ReuseMode::FullPartial | ReuseMode::Multilevel
        )
    }

    pub fn partial_enabled(self) -> bool {
        matches!(self, ReuseMode::Partial | ReuseMode::FullPartial)
    }

    pub fn multi_level_enabled(self) -> bool {
        self == ReuseMode::Multilevel
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub reuse_mode: ReuseMode,
    /// When false, eviction always deletes instead of spilling.
    pub spill_enabled: bool,
    /// Fraction of total memory backing the cache when no explicit limit is set.
    pub cache_fraction: f64,
    /// Explicit byte limit; overrides `cache_fraction`.
    pub cache_limit_bytes: Option<u64>,
    /// Entries cheaper to recompute than this are deleted, not spilled.
    pub min_spill_time_ms: u64,
    /// Bandwidth observations below this payload size are discarded.
    pub min_spill_data_mb: f64,
    /// When true, only admit matrix outputs whose variable was marked.
    pub comp_assume_read_write: bool,
    /// Spill directory override; defaults to a per-process temp directory.
    pub spill_dir: Option<PathBuf>,
    /// Gates the removed-set bookkeeping behind del-hit statistics.
    pub statistics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reuse_mode: ReuseMode::Full,
            spill_enabled: true,
            cache_fraction: 0.05,
            cache_limit_bytes: None,
            min_spill_time_ms: 100,
            min_spill_data_mb: 20.0,
            comp_assume_read_write: false,
            spill_dir: None,
            statistics: true,
        }
    }
}

impl CacheConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open cache config {}", path.display()))?;
        serde_yaml::from_reader(file).context("failed to deserialise cache config")
    }

    /// Resolve the byte limit: the explicit override, or `cache_fraction`
    /// of total system memory.
    pub fn resolve_limit(&self) -> u64 {
        if let Some(limit) = self.cache_limit_bytes {
            return limit;
        }
        let mut system = System::new();
        system.refresh_memory();
        (self.cache_fraction * system.total_memory() as f64) as u64
    }
}
