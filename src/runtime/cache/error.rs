//! Typed failures surfaced by the reuse cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create spill directory {path}")]
    SpillDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write spill file {path}")]
    SpillWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read spill file {path}")]
    SpillRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("matrix codec failure on {path}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("no cached value for lineage id {id}")]
    Missing { id: u64 },

    #[error("cached value for lineage id {id} was dropped before completion")]
    Dropped { id: u64 },

    #[error("lineage id {id} does not hold a {expected} value")]
    KindMismatch { id: u64, expected: &'static str },

    #[error("output variable `{name}` is not bound in the execution context")]
    UnboundOutput { name: String },

    #[error("cannot spill {kind} entry for lineage id {id}")]
    SpillUnsupported { id: u64, kind: &'static str },
}
