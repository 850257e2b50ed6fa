//! Disk spill I/O and adaptive bandwidth estimation.

use std::env;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::data::MatrixBlock;
use crate::runtime::cache::error::CacheError;

pub(crate) const MB: f64 = 1024.0 * 1024.0;

/// Environment override for the spill root, checked before the system
/// temp directory.
pub const SPILL_DIR_ENV: &str = "LATTICE_SPILL_DIR";

/// Record kept for an evicted-but-valuable entry.
#[derive(Debug, Clone)]
pub(crate) struct SpillRecord {
    pub path: PathBuf,
    pub compute_time_ns: u64,
}

/// Adaptive {read,write} x {dense,sparse} disk speeds in MB/s.
///
/// Every sufficiently large observed I/O is blended in with weight 1/2, so
/// the seeds converge to the actual hardware speed without calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskSpeeds {
    pub read_dense: f64,
    pub read_sparse: f64,
    pub write_dense: f64,
    pub write_sparse: f64,
}

impl Default for DiskSpeeds {
    fn default() -> Self {
        Self {
            read_dense: 450.0,
            read_sparse: 150.0,
            write_dense: 300.0,
            write_sparse: 100.0,
        }
    }
}

impl DiskSpeeds {
    /// Estimated seconds to write the payload out and read it back.
    pub fn round_trip_secs(&self, size_mb: f64, sparse: bool) -> f64 {
        let load = size_mb / if sparse { self.read_sparse } else { self.read_dense };
        let write = size_mb / if sparse { self.write_sparse } else { self.write_dense };
        load + write
    }

    pub fn observe_read(&mut self, sparse: bool, size_mb: f64, elapsed_secs: f64, min_mb: f64) {
        let Some(speed) = observed_speed(size_mb, elapsed_secs, min_mb) else {
            return;
        };
        if sparse {
            self.read_sparse = blend(self.read_sparse, speed);
        } else {
            self.read_dense = blend(self.read_dense, speed);
        }
    }

    pub fn observe_write(&mut self, sparse: bool, size_mb: f64, elapsed_secs: f64, min_mb: f64) {
        let Some(speed) = observed_speed(size_mb, elapsed_secs, min_mb) else {
            return;
        };
        if sparse {
            self.write_sparse = blend(self.write_sparse, speed);
        } else {
            self.write_dense = blend(self.write_dense, speed);
        }
    }
}

fn blend(old: f64, observed: f64) -> f64 {
    (old + observed) / 2.0
}

fn observed_speed(size_mb: f64, elapsed_secs: f64, min_mb: f64) -> Option<f64> {
    // Tiny payloads and zero-length timings make useless samples.
    if size_mb < min_mb || elapsed_secs <= 0.0 {
        None
    } else {
        Some(size_mb / elapsed_secs)
    }
}

/// Create the per-process spill directory on first use.
pub(crate) fn create_spill_dir(configured: Option<&Path>) -> Result<PathBuf, CacheError> {
    let root = match configured {
        Some(path) => path.to_path_buf(),
        None => env::var(SPILL_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir()),
    };
    let dir = root.join(format!("lattice-spill-{}", std::process::id()));
    fs::create_dir_all(&dir).map_err(|source| CacheError::SpillDir {
        path: dir.clone(),
        source,
    })?;
    debug!(path = %dir.display(), "spill directory created");
    Ok(dir)
}

/// Write one block; returns the elapsed seconds for the bandwidth estimate.
pub(crate) fn write_block(path: &Path, block: &MatrixBlock) -> Result<f64, CacheError> {
    let started = Instant::now();
    let file = File::create(path).map_err(|source| CacheError::SpillWrite {
        path: path.to_path_buf(),
        source,
    })?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, block).map_err(|source| CacheError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(started.elapsed().as_secs_f64())
}

/// Read one block back; returns the block and the elapsed seconds.
pub(crate) fn read_block(path: &Path) -> Result<(MatrixBlock, f64), CacheError> {
    let started = Instant::now();
    let file = File::open(path).map_err(|source| CacheError::SpillRead {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    let block = bincode::deserialize_from(reader).map_err(|source| CacheError::Codec {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((block, started.elapsed().as_secs_f64()))
}

/// Best-effort removal after a reload; a stale file costs disk, not
/// correctness.
pub(crate) fn remove_file(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        debug!(path = %path.display(), %err, "failed to remove spill file");
    }
}
