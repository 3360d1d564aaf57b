//! Key Router (spec.md §4.D): routing-key extraction, hashing, and
//! primary/replica selection.

use std::sync::Arc;

use rand::Rng;

use crate::node::{Connect, NodeClient};
use crate::pool::NodePool;
use crate::slot_map::{SlotMap, SLOT_SIZE};

/// Cluster-wide replica read policy (spec.md §4.D step 4 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaReadPolicy {
    #[default]
    Never,
    Always,
    Share,
}

/// Per-call routing intent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutePolicy {
    pub read_only: bool,
}

/// Extracts the routing key from a command's first key argument, honoring
/// hash-tag semantics (spec.md §4.D step 1 / §6 "Hashing contract").
pub fn routing_key(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(rel_close) = key[open + 1..].iter().position(|&b| b == b'}') {
            if rel_close > 0 {
                return &key[open + 1..open + 1 + rel_close];
            }
        }
    }
    key
}

/// CRC-16/XMODEM over the routing key, modulo 16384 (spec.md §4.D step 2).
pub fn slot_for_key(key: &[u8]) -> u16 {
    let tag = routing_key(key);
    crc16::State::<crc16::XMODEM>::calculate(tag) % SLOT_SIZE
}

pub struct KeyRouter<C> {
    slot_map: Arc<SlotMap>,
    pool: Arc<NodePool<C>>,
    replica_policy: ReplicaReadPolicy,
}

impl<C: Connect> KeyRouter<C> {
    pub fn new(slot_map: Arc<SlotMap>, pool: Arc<NodePool<C>>, replica_policy: ReplicaReadPolicy) -> Self {
        KeyRouter {
            slot_map,
            pool,
            replica_policy,
        }
    }

    /// Selects a node client for `key` under `policy` (spec.md §4.D steps
    /// 3-5). Returns `None` when the pool has no ready node at all for an
    /// uncovered slot, or when the covered slot's designated client itself
    /// fails to materialize — the caller sees a routing/connection error
    /// rather than being silently rerouted to an unrelated node.
    pub async fn select(&self, key: &[u8], policy: RoutePolicy) -> Option<NodeClient<C>> {
        let slot = slot_for_key(key);
        let addrs = match self.slot_map.addrs_for_slot(slot) {
            Some(addrs) => addrs,
            None => return self.pool.any_live(),
        };

        let index = self.choose_index(addrs.len(), policy);
        let addr = match addrs.at(index).or_else(|| addrs.at(0)) {
            Some(addr) => addr.clone(),
            None => return self.pool.any_live(),
        };

        // The slot is covered; a failure to materialize its designated
        // client is a connection/routing error, not an uncovered slot — the
        // any-live fallback above is licensed only for the latter (spec.md
        // §8: "or any ready node if the slot is uncovered").
        let node = self.pool.get(addr).await.ok()?;

        node.reconcile_read_mode(index > 0).await;
        Some(node)
    }

    fn choose_index(&self, node_count: usize, policy: RoutePolicy) -> usize {
        if !policy.read_only || node_count <= 1 {
            return 0;
        }
        match self.replica_policy {
            ReplicaReadPolicy::Never => 0,
            ReplicaReadPolicy::Always => rand::thread_rng().gen_range(1..node_count),
            ReplicaReadPolicy::Share => rand::thread_rng().gen_range(0..node_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_tag_routes_both_keys_to_the_same_slot() {
        let a = slot_for_key(b"{user1000}.following");
        let b = slot_for_key(b"{user1000}.followers");
        assert_eq!(a, b);
    }

    #[test]
    fn unmatched_open_brace_hashes_the_whole_key() {
        assert_eq!(routing_key(b"foo{bar"), b"foo{bar");
    }

    #[test]
    fn empty_tag_hashes_the_whole_key() {
        assert_eq!(routing_key(b"{}foo"), b"{}foo");
    }

    #[test]
    fn tag_is_extracted_between_first_braces() {
        assert_eq!(routing_key(b"{tag}rest{ignored}"), b"tag");
    }

    #[test]
    fn slot_is_within_range() {
        for key in [&b"a"[..], b"hello", b"{tag}x", b""] {
            assert!(slot_for_key(key) < SLOT_SIZE);
        }
    }
}
