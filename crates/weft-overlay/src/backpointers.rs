//! Reverse links: who lists this node in their routing table.
//!
//! Populated while newcomers traverse the mesh during join and consulted
//! only by that traversal; steady-state routing never reads them.

use std::collections::HashMap;

use parking_lot::Mutex;
use weft_core::{Id, DIGITS};
use weft_proto::NodeHandle;

/// Per-level sets of nodes that hold this node in their tables.
pub struct Backpointers {
    levels: Mutex<Vec<HashMap<Id, NodeHandle>>>,
}

impl Backpointers {
    /// Creates empty sets for every level.
    pub fn new() -> Self {
        Self {
            levels: Mutex::new((0..DIGITS).map(|_| HashMap::new()).collect()),
        }
    }

    /// Records that `node` lists us at `level`. Idempotent; out-of-range
    /// levels are ignored.
    pub fn add(&self, level: usize, node: NodeHandle) -> bool {
        if level >= DIGITS {
            return false;
        }
        self.levels.lock()[level].insert(node.id, node);
        true
    }

    /// Drops the link from `node` at `level`.
    pub fn remove(&self, level: usize, id: &Id) -> bool {
        if level >= DIGITS {
            return false;
        }
        self.levels.lock()[level].remove(id).is_some()
    }

    /// Drops `id` from every level. Used when a peer leaves.
    pub fn remove_everywhere(&self, id: &Id) {
        for level in self.levels.lock().iter_mut() {
            level.remove(id);
        }
    }

    /// Returns the nodes listing us at `level`.
    pub fn get(&self, level: usize) -> Vec<NodeHandle> {
        if level >= DIGITS {
            return Vec::new();
        }
        self.levels.lock()[level].values().cloned().collect()
    }
}

impl Default for Backpointers {
    fn default() -> Self {
        Self::new()
    }
}
