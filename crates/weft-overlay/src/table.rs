//! The prefix-indexed routing table.
//!
//! A `DIGITS × BASE` grid of slots. The slot at `(level, digit)` holds
//! nodes whose identifiers share exactly `level` leading digits with the
//! local identifier and carry `digit` at position `level`. Each slot keeps
//! at most [`SLOT_SIZE`] entries ordered closest-first relative to the
//! local identifier; the local node itself is seeded into its own slot on
//! every level and never removed.

use parking_lot::Mutex;
use weft_core::{Id, BASE, DIGITS};
use weft_proto::NodeHandle;

use crate::SLOT_SIZE;

type Rows = [[Vec<NodeHandle>; BASE as usize]; DIGITS];

/// Per-node routing table. One mutex guards the whole grid; every public
/// operation is atomic and none of them block on the network.
pub struct RoutingTable {
    local: NodeHandle,
    rows: Mutex<Rows>,
}

impl RoutingTable {
    /// Creates a table for `local`, seeding it into its slot on every
    /// level.
    pub fn new(local: NodeHandle) -> Self {
        let mut rows: Rows = std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()));
        for level in 0..DIGITS {
            rows[level][local.id.digit(level) as usize].push(local.clone());
        }
        Self {
            local,
            rows: Mutex::new(rows),
        }
    }

    /// Returns the local node's descriptor.
    pub fn local(&self) -> &NodeHandle {
        &self.local
    }

    /// Inserts `node`, returning whether it was added and any entry
    /// evicted to make room.
    ///
    /// The local node and already-present identifiers are ignored. A full
    /// slot only accepts `node` if it is closer to the local identifier
    /// than the slot's current farthest entry.
    pub fn add(&self, node: NodeHandle) -> (bool, Option<NodeHandle>) {
        let level = self.local.id.shared_prefix_len(&node.id);
        if level == DIGITS {
            return (false, None);
        }
        let digit = node.id.digit(level) as usize;

        let mut rows = self.rows.lock();
        let slot = &mut rows[level][digit];
        if let Some(existing) = slot.iter_mut().find(|n| n.id == node.id) {
            // A known identifier on a new endpoint is a rejoin; refresh
            // the address rather than wedging on the stale one.
            if existing.addr != node.addr {
                existing.addr = node.addr;
            }
            return (false, None);
        }

        if slot.len() < SLOT_SIZE {
            slot.push(node);
            sort_slot(slot, &self.local.id);
            return (true, None);
        }

        if self.local.id.closer(&node.id, &slot[SLOT_SIZE - 1].id) {
            let evicted = slot.pop();
            slot.push(node);
            sort_slot(slot, &self.local.id);
            return (true, evicted);
        }

        (false, None)
    }

    /// Removes the entry with identifier `id`, preserving slot order.
    ///
    /// The local node is never removed. Returns whether an entry was
    /// removed.
    pub fn remove(&self, id: &Id) -> bool {
        let level = self.local.id.shared_prefix_len(id);
        if level == DIGITS {
            return false;
        }
        let digit = id.digit(level) as usize;

        let mut rows = self.rows.lock();
        let slot = &mut rows[level][digit];
        match slot.iter().position(|n| n.id == *id) {
            Some(pos) => {
                slot.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the head of every non-empty slot on `level`, ascending
    /// digit, excluding the local node.
    pub fn get_level(&self, level: usize) -> Vec<NodeHandle> {
        let rows = self.rows.lock();
        rows[level]
            .iter()
            .filter_map(|slot| slot.first())
            .filter(|head| head.id != self.local.id)
            .cloned()
            .collect()
    }

    /// Picks the next hop toward `target`.
    ///
    /// Scans the level of shared prefix between the local identifier and
    /// the target, keeping the best slot head under `better_choice`; while
    /// the local node remains its own best candidate the scan advances one
    /// level. Returning the local node means it is the root for `target`.
    pub fn next_hop(&self, target: &Id) -> NodeHandle {
        let rows = self.rows.lock();
        let mut best = self.local.clone();
        let mut level = self.local.id.shared_prefix_len(target);
        while level < DIGITS {
            for slot in rows[level].iter() {
                if let Some(head) = slot.first() {
                    if target.better_choice(&head.id, &best.id) {
                        best = head.clone();
                    }
                }
            }
            if best.id == self.local.id {
                level += 1;
            } else {
                break;
            }
        }
        best
    }

    /// Every distinct non-local entry in the table.
    pub fn peers(&self) -> Vec<NodeHandle> {
        let rows = self.rows.lock();
        let mut seen = std::collections::HashSet::new();
        let mut peers = Vec::new();
        for level in rows.iter() {
            for slot in level.iter() {
                for entry in slot.iter() {
                    if entry.id != self.local.id && seen.insert(entry.id) {
                        peers.push(entry.clone());
                    }
                }
            }
        }
        peers
    }

    /// A substitute for `peer` from the same table level, if any: another
    /// entry that `peer`'s own table could absorb in the leaver's place.
    pub fn replacement_for(&self, peer: &NodeHandle) -> Option<NodeHandle> {
        let level = self.local.id.shared_prefix_len(&peer.id);
        if level == DIGITS {
            return None;
        }
        let rows = self.rows.lock();
        rows[level]
            .iter()
            .flat_map(|slot| slot.iter())
            .find(|n| n.id != peer.id && n.id != self.local.id)
            .cloned()
    }

    /// Number of distinct non-local entries.
    pub fn len(&self) -> usize {
        self.peers().len()
    }

    /// True when the table knows no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<(usize, usize, Vec<NodeHandle>)> {
        let rows = self.rows.lock();
        let mut out = Vec::new();
        for (level, row) in rows.iter().enumerate() {
            for (digit, slot) in row.iter().enumerate() {
                if !slot.is_empty() {
                    out.push((level, digit, slot.clone()));
                }
            }
        }
        out
    }
}

fn sort_slot(slot: &mut [NodeHandle], local: &Id) {
    slot.sort_by(|a, b| {
        if local.closer(&a.id, &b.id) {
            std::cmp::Ordering::Less
        } else if local.closer(&b.id, &a.id) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
}
