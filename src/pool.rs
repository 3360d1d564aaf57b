//! Node Client Pool (spec.md §4.A): owns at most one live client per
//! `host:port`, created on demand through a caller-supplied factory,
//! tombstoned (not deleted) on disconnect, recreated lazily on next use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rand::seq::IteratorRandom;

use crate::error;
use crate::events::{ClusterEvent, EventBus};
use crate::node::{Connect, ConnectionFactory, NodeAddr, NodeClient};

/// `None` is a tombstone: the endpoint was live once, disconnected, and
/// will be recreated the next time it's asked for (spec.md §3 invariant:
/// "closed endpoints are tombstoned, never deleted, until replaced").
struct Entries<C>(HashMap<NodeAddr, Option<NodeClient<C>>>);

pub struct NodePool<C> {
    entries: Mutex<Entries<C>>,
    factory: ConnectionFactory<C>,
    events: EventBus,
    ever_ready: AtomicBool,
    quitting: AtomicBool,
}

impl<C: Connect> NodePool<C> {
    pub fn new(factory: ConnectionFactory<C>, events: EventBus) -> Self {
        NodePool {
            entries: Mutex::new(Entries(HashMap::new())),
            factory,
            events,
            ever_ready: AtomicBool::new(false),
            quitting: AtomicBool::new(false),
        }
    }

    /// Idempotent: returns the live client for `addr`, creating it via the
    /// factory if it's missing or tombstoned.
    pub async fn get(&self, addr: NodeAddr) -> redis::RedisResult<NodeClient<C>> {
        if self.quitting.load(Ordering::Acquire) {
            return Err(error::cluster_is_quitting());
        }
        if let Some(existing) = self.entries.lock().unwrap().0.get(&addr).and_then(|e| e.clone()) {
            return Ok(existing);
        }

        let conn = (self.factory)(addr.clone()).await?;
        let client = NodeClient::new(addr.clone(), conn);
        self.entries
            .lock()
            .unwrap()
            .0
            .insert(addr, Some(client.clone()));
        self.note_readiness_change();
        Ok(client)
    }

    /// Marks `addr`'s entry broken (spec.md §4.A "error" observer). The
    /// caller is responsible for triggering the follow-up slot refresh —
    /// see DESIGN.md for why that responsibility sits with the command
    /// executor rather than here.
    pub fn tombstone(&self, addr: &NodeAddr, err: &redis::RedisError) {
        let had_entry = {
            let mut entries = self.entries.lock().unwrap();
            entries.0.insert(addr.clone(), None).flatten().is_some()
        };
        if had_entry {
            self.events.emit(ClusterEvent::ConnectionError {
                addr: addr.clone(),
                error: err.to_string(),
            });
            self.note_readiness_change();
        }
    }

    /// Drops any pool entry whose address is no longer referenced by the
    /// current slot allocation (spec.md §4.C step 3).
    pub fn prune_unreferenced(&self, keep: &std::collections::HashSet<NodeAddr>) {
        let mut entries = self.entries.lock().unwrap();
        entries.0.retain(|addr, _| keep.contains(addr));
    }

    /// A uniformly random live entry, skipping any address in `exclude`
    /// (spec.md §4.C step 2/4: picking a node to query for discovery).
    pub fn random_live(&self, exclude: &[NodeAddr]) -> Option<NodeClient<C>> {
        let entries = self.entries.lock().unwrap();
        entries
            .0
            .iter()
            .filter_map(|(addr, entry)| {
                if exclude.contains(addr) {
                    None
                } else {
                    entry.clone()
                }
            })
            .choose(&mut rand::thread_rng())
    }

    /// Any ready entry at all, used as a routing fallback when a slot is
    /// uncovered (spec.md §4.D step 3).
    pub fn any_live(&self) -> Option<NodeClient<C>> {
        self.random_live(&[])
    }

    pub fn is_ready(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.0.values().any(Option::is_some)
    }

    fn note_readiness_change(&self) {
        let ready_now = self.is_ready();
        if ready_now {
            if !self.ever_ready.swap(true, Ordering::AcqRel) {
                self.events.emit(ClusterEvent::Ready);
            }
        } else if self.ever_ready.load(Ordering::Acquire) {
            self.events.emit(ClusterEvent::Unready);
        }
    }

    /// Quits every live entry and marks the pool as quitting; new `get`
    /// calls fail from this point on (spec.md §4.G).
    pub fn quit(&self) {
        self.quitting.store(true, Ordering::Release);
        let mut entries = self.entries.lock().unwrap();
        entries.0.clear();
        self.events.emit(ClusterEvent::End);
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    pub fn seed(&self, addr: NodeAddr, client: NodeClient<C>) {
        self.entries.lock().unwrap().0.insert(addr, Some(client));
        self.note_readiness_change();
    }
}
