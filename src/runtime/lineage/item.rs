//! Lineage fingerprints identifying deterministic computations.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Shared handle under which lineage items flow through the runtime.
pub type LineageKey = Arc<LineageItem>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const LEAF_OPCODE: &str = "var";

/// Opcodes whose outputs are not a pure function of their inputs.
static DATA_GEN_OPCODES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["rand", "sample", "time"].into_iter().collect());

/// A node of the lineage DAG: an operator applied to input lineages, or a
/// leaf naming a variable or literal.
///
/// Two items compare equal iff they denote the same computation (operator,
/// leaf payload, and inputs, recursively). The `id` is a process-unique
/// integer used only for spill file naming and never participates in
/// equality.
pub struct LineageItem {
    id: u64,
    opcode: String,
    data: String,
    inputs: Vec<LineageKey>,
    hash: u64,
}

impl LineageItem {
    /// Leaf item for a variable or literal.
    pub fn leaf(data: impl Into<String>) -> LineageKey {
        Self::build(LEAF_OPCODE.to_string(), data.into(), Vec::new())
    }

    /// Operator item over already-traced inputs.
    pub fn node(opcode: impl Into<String>, inputs: Vec<LineageKey>) -> LineageKey {
        Self::build(opcode.into(), String::new(), inputs)
    }

    fn build(opcode: String, data: String, inputs: Vec<LineageKey>) -> LineageKey {
        let mut hasher = DefaultHasher::new();
        opcode.hash(&mut hasher);
        data.hash(&mut hasher);
        for input in &inputs {
            hasher.write_u64(input.hash);
        }
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            opcode,
            data,
            inputs,
            hash: hasher.finish(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn inputs(&self) -> &[LineageKey] {
        &self.inputs
    }

    pub fn is_leaf(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Precomputed structural fingerprint.
    pub fn fingerprint(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for LineageItem {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.opcode == other.opcode
            && self.data == other.data
            && self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&other.inputs)
                .all(|(a, b)| a.as_ref() == b.as_ref())
    }
}

impl Eq for LineageItem {}

impl Hash for LineageItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for LineageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.id, self.opcode)?;
        if !self.data.is_empty() {
            write!(f, " {}", self.data)?;
        }
        if !self.inputs.is_empty() {
            let ids: Vec<_> = self.inputs.iter().map(|i| i.id.to_string()).collect();
            write!(f, " [{}]", ids.join(","))?;
        }
        Ok(())
    }
}

/// Whether the lineage rooted at `root` reaches a data-generating operator
/// before crossing the `boundary` items.
pub fn contains_rand_data_gen(boundary: &HashSet<LineageKey>, root: &LineageKey) -> bool {
    fn walk(node: &LineageKey, boundary: &HashSet<LineageKey>, seen: &mut HashSet<u64>) -> bool {
        if !seen.insert(node.id()) {
            return false;
        }
        if boundary.contains(node) {
            return false;
        }
        if DATA_GEN_OPCODES.contains(node.opcode()) {
            return true;
        }
        node.inputs().iter().any(|input| walk(input, boundary, seen))
    }
    let mut seen = HashSet::new();
    walk(root, boundary, &mut seen)
}
