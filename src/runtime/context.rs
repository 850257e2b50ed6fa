//! Execution context: the symbol table and lineage bindings of one worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::data::{Data, MatrixBlock, ScalarValue};
use crate::runtime::instruction::ComputationInstruction;
use crate::runtime::lineage::LineageKey;

/// Per-thread view of variable bindings, their lineage, and reuse marks.
///
/// Contexts are not shared between threads; the cache is.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    vars: HashMap<String, Data>,
    lineage: HashMap<String, LineageKey>,
    marked: HashSet<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(&self, name: &str) -> Option<&Data> {
        self.vars.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, data: Data) {
        self.vars.insert(name.into(), data);
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Data> {
        self.vars.remove(name)
    }

    /// Reclaim a data object displaced from the symbol table.
    pub fn cleanup_data(&mut self, data: Data) {
        drop(data);
    }

    /// Shared handle to the matrix bound under `name`, if any.
    pub fn matrix(&self, name: &str) -> Option<Arc<MatrixBlock>> {
        self.vars.get(name).and_then(|d| d.as_matrix()).cloned()
    }

    pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
        self.vars.get(name).and_then(|d| d.as_scalar()).cloned()
    }

    pub fn set_matrix_output(&mut self, name: impl Into<String>, block: Arc<MatrixBlock>) {
        self.vars.insert(name.into(), Data::Matrix(block));
    }

    pub fn set_scalar_output(&mut self, name: impl Into<String>, value: ScalarValue) {
        self.vars.insert(name.into(), Data::Scalar(value));
    }

    pub fn lineage_of(&self, name: &str) -> Option<&LineageKey> {
        self.lineage.get(name)
    }

    pub fn set_lineage(&mut self, name: impl Into<String>, item: LineageKey) {
        self.lineage.insert(name.into(), item);
    }

    /// Record the output lineage of an executed instruction.
    pub fn trace_instruction(&mut self, inst: &ComputationInstruction) {
        let item = inst.lineage_item(self);
        self.lineage.insert(inst.output().to_string(), item);
    }

    /// Flag a variable's object as a known read-write candidate for caching.
    pub fn mark_for_reuse(&mut self, name: impl Into<String>) {
        self.marked.insert(name.into());
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.marked.contains(name)
    }
}
