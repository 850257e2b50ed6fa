// Matrix and scalar value model shared by the runtime and the cache.
pub mod matrix;
pub mod value;

pub use matrix::MatrixBlock;
pub use value::{Data, ScalarValue, ValueKind};
