//! Runtime values bound in the execution context.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::matrix::MatrixBlock;

/// Shape of an instruction output, fixed at instruction construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Matrix,
    Scalar,
}

/// A scalar produced by an instruction or function output.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    F64(f64),
    I64(i64),
    Bool(bool),
    Str(String),
}

impl ScalarValue {
    /// Heap footprint used for cache space accounting.
    pub fn size(&self) -> u64 {
        match self {
            ScalarValue::Str(s) => 24 + s.len() as u64,
            _ => 16,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::F64(v) => write!(f, "{v}"),
            ScalarValue::I64(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// A value bound to a variable name.
///
/// Matrix payloads are shared behind `Arc` so a cache hit hands the resident
/// block to the caller without copying.
#[derive(Debug, Clone)]
pub enum Data {
    Matrix(Arc<MatrixBlock>),
    Scalar(ScalarValue),
}

impl Data {
    pub fn kind(&self) -> ValueKind {
        match self {
            Data::Matrix(_) => ValueKind::Matrix,
            Data::Scalar(_) => ValueKind::Scalar,
        }
    }

    pub fn as_matrix(&self) -> Option<&Arc<MatrixBlock>> {
        match self {
            Data::Matrix(m) => Some(m),
            Data::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Data::Scalar(s) => Some(s),
            Data::Matrix(_) => None,
        }
    }

    /// Whether both bindings refer to the same underlying object.
    pub fn same_object(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Matrix(a), Data::Matrix(b)) => Arc::ptr_eq(a, b),
            (Data::Scalar(a), Data::Scalar(b)) => a == b,
            _ => false,
        }
    }
}
