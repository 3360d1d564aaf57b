//! Slot Discovery (spec.md §4.C): queries a live node for the cluster's
//! slot allocation, coalesces concurrent refresh requests behind a single
//! in-flight query, and prunes pool entries the new allocation doesn't
//! reference.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use redis::{cmd, RedisResult, Value};
use tokio::sync::oneshot;
use tracing::{info, trace, warn};

use crate::error;
use crate::events::{ClusterEvent, EventBus};
use crate::node::{Connect, NodeAddr};
use crate::pool::NodePool;
use crate::slot_map::{SlotMap, SlotRange};

/// Default bound on the pending-refresh queue (spec.md §3).
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 16;

type Waiter = oneshot::Sender<RedisResult<()>>;

pub struct SlotDiscovery<C> {
    pool: std::sync::Arc<NodePool<C>>,
    slot_map: std::sync::Arc<SlotMap>,
    events: EventBus,
    /// `Some(queue)` means a refresh is in flight; the queue holds waiters
    /// beyond the one already doing the work.
    pending: Mutex<Option<VecDeque<Waiter>>>,
    max_queue_length: usize,
    /// The source's `queueShift`: `true` (default) evicts the eldest queued
    /// waiter on overflow, `false` rejects the newcomer instead.
    queue_shift: bool,
    ready_timeout: Option<Duration>,
}

impl<C: Connect> SlotDiscovery<C> {
    pub fn new(
        pool: std::sync::Arc<NodePool<C>>,
        slot_map: std::sync::Arc<SlotMap>,
        events: EventBus,
        max_queue_length: usize,
        queue_shift: bool,
        ready_timeout: Option<Duration>,
    ) -> Self {
        SlotDiscovery {
            pool,
            slot_map,
            events,
            pending: Mutex::new(None),
            max_queue_length,
            queue_shift,
            ready_timeout,
        }
    }

    /// Runs (or joins) a slot refresh. See spec.md §4.C for the full
    /// numbered semantics this follows step by step.
    pub async fn refresh(&self) -> RedisResult<()> {
        if self.pool.is_quitting() {
            return Err(error::cluster_is_quitting());
        }

        let receiver = {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_mut() {
                Some(queue) => {
                    // Step 1: a refresh is already in flight, enqueue.
                    let (tx, rx) = oneshot::channel();
                    if queue.len() >= self.max_queue_length {
                        if self.queue_shift {
                            if let Some(evicted) = queue.pop_front() {
                                let _ = evicted.send(Err(error::max_slot_queue_length_reached()));
                            }
                            queue.push_back(tx);
                        } else {
                            let _ = tx.send(Err(error::max_slot_queue_length_reached()));
                        }
                    } else {
                        queue.push_back(tx);
                    }
                    Some(rx)
                }
                None => {
                    // Step 2-4: nobody else is refreshing; this call does
                    // the work itself, with the queue marking "in flight".
                    *pending = Some(VecDeque::new());
                    None
                }
            }
        };

        if let Some(rx) = receiver {
            return rx.await.unwrap_or_else(|_| Err(error::cluster_is_quitting()));
        }

        let result = self.discover_once().await;
        self.drain_waiters(clone_redis_result(&result));
        result
    }

    async fn discover_once(&self) -> RedisResult<()> {
        if self.pool.is_quitting() {
            return Err(error::cluster_is_quitting());
        }

        let starting_node = match self.pool.any_live() {
            Some(node) => node,
            None => self.wait_for_ready().await?,
        };

        let mut excluded = vec![starting_node.addr().clone()];
        let mut candidate = Some(starting_node);
        let mut per_node_errors = Vec::new();

        loop {
            let node = match candidate.take() {
                Some(node) => node,
                None => match self.pool.random_live(&excluded) {
                    Some(node) => node,
                    None => return Err(error::couldnt_get_slot_allocation(&per_node_errors)),
                },
            };
            let addr = node.addr().clone();
            trace!(%addr, "querying node for slot allocation");

            let mut conn = node.connection();
            match cmd("CLUSTER").arg("SLOTS").query_async::<_, Value>(&mut conn).await {
                Ok(value) => match parse_slot_ranges(&value) {
                    Ok(ranges) => {
                        self.apply(&ranges);
                        info!(slots = ranges.len(), "slot refresh completed");
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(%addr, %err, "slot allocation reply was unparseable");
                        per_node_errors.push((addr.to_string(), err));
                        excluded.push(addr);
                    }
                },
                Err(err) => {
                    warn!(%addr, %err, "slot enumeration command failed");
                    per_node_errors.push((addr.to_string(), err));
                    excluded.push(addr);
                }
            }
        }
    }

    fn apply(&self, ranges: &[SlotRange]) {
        self.slot_map.replace(ranges);
        let keep = self.slot_map.all_addrs();
        self.pool.prune_unreferenced(&keep);
    }

    async fn wait_for_ready(&self) -> RedisResult<NodeClientAlias<C>> {
        let mut receiver = self.events.subscribe();
        let wait = async {
            loop {
                if let Some(node) = self.pool.any_live() {
                    return node;
                }
                match receiver.recv().await {
                    Ok(ClusterEvent::Ready) => {
                        if let Some(node) = self.pool.any_live() {
                            return node;
                        }
                    }
                    Ok(_) => continue,
                    Err(_) => continue,
                }
            }
        };
        match self.ready_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| error::ready_timeout_reached()),
            None => Ok(wait.await),
        }
    }

    fn drain_waiters(&self, result: RedisResult<()>) {
        let queue = {
            let mut pending = self.pending.lock().unwrap();
            pending.take().unwrap_or_default()
        };
        for waiter in queue {
            let _ = waiter.send(clone_redis_result(&result));
        }
    }
}

type NodeClientAlias<C> = crate::node::NodeClient<C>;

fn clone_redis_result(result: &RedisResult<()>) -> RedisResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => Err(redis::RedisError::from((err.kind(), "slot refresh error", err.to_string()))),
    }
}

/// Parses a `CLUSTER SLOTS`-shaped reply into `[start, end, primary,
/// replica...]` ranges (spec.md §4.C step 3).
fn parse_slot_ranges(value: &Value) -> RedisResult<Vec<SlotRange>> {
    let mut ranges = Vec::new();
    let Value::Array(items) = value else {
        return Err(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "unexpected slot allocation reply shape",
        )));
    };

    for item in items {
        let Value::Array(fields) = item else { continue };
        if fields.len() < 3 {
            continue;
        }
        let Value::Int(start) = fields[0] else { continue };
        let Value::Int(end) = fields[1] else { continue };

        let mut node_addrs: Vec<NodeAddr> = fields[2..]
            .iter()
            .filter_map(|node| {
                let Value::Array(node) = node else { return None };
                if node.len() < 2 {
                    return None;
                }
                let Value::BulkString(ref host) = node[0] else { return None };
                let host = String::from_utf8_lossy(host);
                if host.is_empty() {
                    return None;
                }
                let Value::Int(port) = node[1] else { return None };
                Some(NodeAddr::from(format!("{host}:{port}")))
            })
            .collect();

        if node_addrs.is_empty() {
            continue;
        }
        let replicas = node_addrs.split_off(1);
        ranges.push(SlotRange {
            start: start as u16,
            end: end as u16,
            primary: node_addrs.pop().unwrap(),
            replicas,
        });
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slot_ranges_with_replicas() {
        let value = Value::Array(vec![Value::Array(vec![
            Value::Int(0),
            Value::Int(16383),
            Value::Array(vec![Value::BulkString(b"node1".to_vec()), Value::Int(6379)]),
            Value::Array(vec![Value::BulkString(b"node2".to_vec()), Value::Int(6380)]),
        ])]);
        let ranges = parse_slot_ranges(&value).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[0].end, 16383);
        assert_eq!(ranges[0].primary, NodeAddr::from("node1:6379"));
        assert_eq!(ranges[0].replicas, vec![NodeAddr::from("node2:6380")]);
    }

    #[test]
    fn skips_entries_with_empty_host() {
        let value = Value::Array(vec![Value::Array(vec![
            Value::Int(0),
            Value::Int(100),
            Value::Array(vec![Value::BulkString(b"".to_vec()), Value::Int(6379)]),
        ])]);
        let ranges = parse_slot_ranges(&value).unwrap();
        assert!(ranges.is_empty());
    }
}
