//! Cache entries and the placeholder blocking protocol.
//!
//! Each entry owns its own lock and condition variable so that threads
//! waiting for a value under computation park on the entry alone, never on
//! the cache-wide mutex.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::data::{Data, MatrixBlock, ScalarValue, ValueKind};
use crate::runtime::cache::error::CacheError;
use crate::runtime::lineage::LineageKey;

/// Residency state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Placeholder: a producer is computing the value.
    Empty,
    /// Value resident in memory.
    Cached,
    /// Value just re-read from spill; one eviction pass of grace.
    Reloaded,
    /// Placeholder abandoned without a value; waiters fail.
    ToRemove,
}

impl CacheStatus {
    pub fn can_evict(self) -> bool {
        matches!(self, CacheStatus::Cached | CacheStatus::Reloaded)
    }
}

#[derive(Debug)]
struct EntrySlot {
    matrix: Option<Arc<MatrixBlock>>,
    scalar: Option<ScalarValue>,
    compute_time_ns: u64,
    status: CacheStatus,
    origin: Option<LineageKey>,
}

impl EntrySlot {
    fn is_empty(&self) -> bool {
        self.matrix.is_none() && self.scalar.is_none()
    }
}

/// One cache slot: either a value or a placeholder other threads block on.
#[derive(Debug)]
pub struct CacheEntry {
    key: LineageKey,
    kind: ValueKind,
    slot: Mutex<EntrySlot>,
    filled: Condvar,
}

impl CacheEntry {
    /// New placeholder installed ahead of a computation.
    pub(crate) fn placeholder(key: LineageKey, kind: ValueKind) -> Arc<Self> {
        Arc::new(Self {
            key,
            kind,
            slot: Mutex::new(EntrySlot {
                matrix: None,
                scalar: None,
                compute_time_ns: 0,
                status: CacheStatus::Empty,
                origin: None,
            }),
            filled: Condvar::new(),
        })
    }

    /// New entry that already carries its value (direct put or reload).
    pub(crate) fn with_value(
        key: LineageKey,
        data: Data,
        compute_time_ns: u64,
        status: CacheStatus,
    ) -> Arc<Self> {
        let kind = data.kind();
        let (matrix, scalar) = match data {
            Data::Matrix(m) => (Some(m), None),
            Data::Scalar(s) => (None, Some(s)),
        };
        Arc::new(Self {
            key,
            kind,
            slot: Mutex::new(EntrySlot {
                matrix,
                scalar,
                compute_time_ns,
                status,
                origin: None,
            }),
            filled: Condvar::new(),
        })
    }

    pub fn key(&self) -> &LineageKey {
        &self.key
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn status(&self) -> CacheStatus {
        self.slot.lock().status
    }

    pub fn is_placeholder(&self) -> bool {
        self.status() == CacheStatus::Empty
    }

    pub fn compute_time_ns(&self) -> u64 {
        self.slot.lock().compute_time_ns
    }

    /// Lineage the value was originally computed under, when it arrived by
    /// a multi-output move.
    pub fn origin(&self) -> Option<LineageKey> {
        self.slot.lock().origin.clone()
    }

    /// Byte contribution to the cache budget; placeholders contribute zero.
    pub fn size(&self) -> u64 {
        let slot = self.slot.lock();
        slot.matrix.as_ref().map(|m| m.in_memory_size()).unwrap_or(0)
            + slot.scalar.as_ref().map(|s| s.size()).unwrap_or(0)
    }

    /// The resident matrix, without blocking.
    pub(crate) fn matrix_if_filled(&self) -> Option<Arc<MatrixBlock>> {
        self.slot.lock().matrix.clone()
    }

    pub(crate) fn scalar_if_filled(&self) -> Option<ScalarValue> {
        self.slot.lock().scalar.clone()
    }

    /// Block until a producer fills the entry, then return the matrix.
    ///
    /// Must be called with the cache-wide mutex released.
    pub fn block_for_matrix(&self) -> Result<Arc<MatrixBlock>, CacheError> {
        if self.kind != ValueKind::Matrix {
            return Err(CacheError::KindMismatch {
                id: self.key.id(),
                expected: "matrix",
            });
        }
        let mut slot = self.slot.lock();
        loop {
            if let Some(block) = &slot.matrix {
                return Ok(block.clone());
            }
            if slot.status == CacheStatus::ToRemove {
                return Err(CacheError::Dropped { id: self.key.id() });
            }
            self.filled.wait(&mut slot);
        }
    }

    /// Block until a producer fills the entry, then return the scalar.
    pub fn block_for_scalar(&self) -> Result<ScalarValue, CacheError> {
        if self.kind != ValueKind::Scalar {
            return Err(CacheError::KindMismatch {
                id: self.key.id(),
                expected: "scalar",
            });
        }
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = &slot.scalar {
                return Ok(value.clone());
            }
            if slot.status == CacheStatus::ToRemove {
                return Err(CacheError::Dropped { id: self.key.id() });
            }
            self.filled.wait(&mut slot);
        }
    }

    /// Publish a value and wake every waiter. Returns false if the slot was
    /// already filled or abandoned; at most one fill succeeds per entry.
    pub(crate) fn fill(&self, data: Data, compute_time_ns: u64, origin: Option<LineageKey>) -> bool {
        debug_assert_eq!(data.kind(), self.kind);
        let mut slot = self.slot.lock();
        if !slot.is_empty() || slot.status == CacheStatus::ToRemove {
            return false;
        }
        match data {
            Data::Matrix(m) => slot.matrix = Some(m),
            Data::Scalar(s) => slot.scalar = Some(s),
        }
        slot.compute_time_ns = compute_time_ns;
        slot.status = CacheStatus::Cached;
        slot.origin = origin;
        self.filled.notify_all();
        true
    }

    /// Abandon a placeholder: waiters wake and observe `Dropped`.
    /// No-op once a value is present.
    pub(crate) fn abort(&self) {
        let mut slot = self.slot.lock();
        if slot.is_empty() {
            slot.status = CacheStatus::ToRemove;
            self.filled.notify_all();
        }
    }

    /// Consume the one eviction pass of grace a reloaded entry holds.
    pub(crate) fn take_second_chance(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.status == CacheStatus::Reloaded {
            slot.status = CacheStatus::Cached;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::lineage::LineageItem;

    #[test]
    fn placeholder_contributes_no_bytes() {
        let e = CacheEntry::placeholder(LineageItem::leaf("X"), ValueKind::Matrix);
        assert_eq!(e.size(), 0);
        assert!(e.is_placeholder());
    }

    #[test]
    fn fill_succeeds_exactly_once() {
        let e = CacheEntry::placeholder(LineageItem::leaf("X"), ValueKind::Scalar);
        assert!(e.fill(Data::Scalar(ScalarValue::F64(1.0)), 5, None));
        assert!(!e.fill(Data::Scalar(ScalarValue::F64(2.0)), 5, None));
        assert_eq!(e.block_for_scalar().unwrap(), ScalarValue::F64(1.0));
        assert_eq!(e.compute_time_ns(), 5);
    }

    #[test]
    fn abort_fails_waiters_but_not_values() {
        let dropped = CacheEntry::placeholder(LineageItem::leaf("X"), ValueKind::Scalar);
        dropped.abort();
        assert!(matches!(
            dropped.block_for_scalar(),
            Err(CacheError::Dropped { .. })
        ));

        let filled = CacheEntry::placeholder(LineageItem::leaf("Y"), ValueKind::Scalar);
        filled.fill(Data::Scalar(ScalarValue::I64(7)), 1, None);
        filled.abort();
        assert_eq!(filled.block_for_scalar().unwrap(), ScalarValue::I64(7));
    }
}
