//! Computation instructions as seen by the reuse machinery.

use crate::data::ValueKind;
use crate::runtime::context::ExecutionContext;
use crate::runtime::lineage::{LineageItem, LineageKey};

/// A single deterministic operation with named inputs and one named output.
#[derive(Debug, Clone)]
pub struct ComputationInstruction {
    opcode: String,
    inputs: Vec<String>,
    output: String,
    output_kind: ValueKind,
    cacheable: bool,
}

impl ComputationInstruction {
    pub fn new(
        opcode: impl Into<String>,
        inputs: Vec<String>,
        output: impl Into<String>,
        output_kind: ValueKind,
    ) -> Self {
        Self {
            opcode: opcode.into(),
            inputs,
            output: output.into(),
            output_kind,
            cacheable: true,
        }
    }

    /// Marks the instruction as outside the reuse machinery (e.g. output
    /// size unknown, or operation has side effects).
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn output_kind(&self) -> ValueKind {
        self.output_kind
    }

    pub fn reuse_eligible(&self) -> bool {
        self.cacheable
    }

    /// Derive the lineage key of this instruction's output from the current
    /// lineage of its inputs; inputs without traced lineage become leaves.
    pub fn lineage_item(&self, ec: &ExecutionContext) -> LineageKey {
        let inputs = self
            .inputs
            .iter()
            .map(|name| {
                ec.lineage_of(name)
                    .cloned()
                    .unwrap_or_else(|| LineageItem::leaf(name.clone()))
            })
            .collect();
        LineageItem::node(self.opcode.clone(), inputs)
    }
}
