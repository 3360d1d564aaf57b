//! Slot Map (spec.md §4.B): a dense, atomically-replaceable snapshot of
//! `slot -> [primary, replica...]`. Readers never block; a refresh builds a
//! new table and swaps the whole thing in one `ArcSwap::store`.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::node::NodeAddr;

/// Number of hash slots a cluster is partitioned into (spec.md §3).
pub const SLOT_SIZE: u16 = 16384;

/// The node list for one slot: position 0 is always the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAddrs {
    addrs: Vec<NodeAddr>,
}

impl SlotAddrs {
    pub fn new(primary: NodeAddr, replicas: Vec<NodeAddr>) -> Self {
        let mut addrs = Vec::with_capacity(1 + replicas.len());
        addrs.push(primary);
        addrs.extend(replicas);
        SlotAddrs { addrs }
    }

    pub fn primary(&self) -> &NodeAddr {
        &self.addrs[0]
    }

    pub fn replicas(&self) -> &[NodeAddr] {
        &self.addrs[1..]
    }

    /// All node addresses for this slot, primary first.
    pub fn all(&self) -> &[NodeAddr] {
        &self.addrs
    }

    /// The address at `index`, where `0` is the primary and `1..n` are
    /// replicas (spec.md §4.D step 4).
    pub fn at(&self, index: usize) -> Option<&NodeAddr> {
        self.addrs.get(index)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// One contiguous range of slots as reported by the cluster's slot
/// enumeration command.
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub primary: NodeAddr,
    pub replicas: Vec<NodeAddr>,
}

type Table = Vec<Option<Arc<SlotAddrs>>>;

/// Thread-safe, lock-free-on-read snapshot of the slot allocation.
pub struct SlotMap {
    table: ArcSwap<Table>,
}

impl Default for SlotMap {
    fn default() -> Self {
        SlotMap::new()
    }
}

impl SlotMap {
    pub fn new() -> Self {
        SlotMap {
            table: ArcSwap::from_pointee(vec![None; SLOT_SIZE as usize]),
        }
    }

    /// The addresses owning `slot`, if the current snapshot covers it.
    pub fn addrs_for_slot(&self, slot: u16) -> Option<Arc<SlotAddrs>> {
        self.table.load().get(slot as usize).cloned().flatten()
    }

    /// Whether the map has never been populated (spec.md §4.E step 2: an
    /// empty map triggers discovery before the first command is routed).
    pub fn is_empty(&self) -> bool {
        self.table.load().iter().all(Option::is_none)
    }

    /// Every distinct node address referenced by the current snapshot —
    /// used to prune pool entries that a fresh discovery no longer covers
    /// (spec.md §4.C step 3, "any node endpoint not referenced ... is quit
    /// and tombstoned").
    pub fn all_addrs(&self) -> HashSet<NodeAddr> {
        self.table
            .load()
            .iter()
            .flatten()
            .flat_map(|slot_addrs| slot_addrs.all().iter().cloned())
            .collect()
    }

    /// Replaces the whole table from freshly discovered ranges
    /// (spec.md §4.C step 3).
    pub fn replace(&self, ranges: &[SlotRange]) {
        let mut table: Table = vec![None; SLOT_SIZE as usize];
        for range in ranges {
            let addrs = Arc::new(SlotAddrs::new(range.primary.clone(), range.replicas.clone()));
            for slot in range.start..=range.end {
                table[slot as usize] = Some(addrs.clone());
            }
        }
        self.table.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddr {
        NodeAddr::from(s)
    }

    #[test]
    fn empty_map_has_no_coverage() {
        let map = SlotMap::new();
        assert!(map.is_empty());
        assert!(map.addrs_for_slot(0).is_none());
        assert!(map.addrs_for_slot(16383).is_none());
    }

    #[test]
    fn replace_covers_boundary_slots_identically() {
        let map = SlotMap::new();
        map.replace(&[SlotRange {
            start: 0,
            end: SLOT_SIZE - 1,
            primary: addr("a:1"),
            replicas: vec![addr("a:2")],
        }]);
        assert!(!map.is_empty());
        assert_eq!(map.addrs_for_slot(0).unwrap().primary(), &addr("a:1"));
        assert_eq!(
            map.addrs_for_slot(SLOT_SIZE - 1).unwrap().primary(),
            &addr("a:1")
        );
        assert_eq!(map.all_addrs().len(), 2);
    }

    #[test]
    fn replace_discards_previous_snapshot() {
        let map = SlotMap::new();
        map.replace(&[SlotRange {
            start: 0,
            end: SLOT_SIZE - 1,
            primary: addr("old:1"),
            replicas: vec![],
        }]);
        map.replace(&[SlotRange {
            start: 0,
            end: SLOT_SIZE - 1,
            primary: addr("new:1"),
            replicas: vec![],
        }]);
        assert_eq!(map.addrs_for_slot(0).unwrap().primary(), &addr("new:1"));
    }
}
