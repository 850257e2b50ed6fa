// Lineage tracing and reuse hooks.
pub mod item;
pub mod rewrite;

pub use item::{contains_rand_data_gen, LineageItem, LineageKey};
pub use rewrite::ReuseRewriter;
