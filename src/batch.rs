//! The pipelined batch object (spec.md §4.F / §6 `batch()`/`multi()`).
//!
//! Spec.md treats the batch as an external collaborator that "internally
//! groups sub-commands by destination node, pipelines them, and returns
//! results in the original submission order" — exactly what the teacher's
//! sync `cluster.rs` does in `map_cmds_to_nodes`/`send_all_commands`/
//! `recv_all_commands`. This is that same grouping strategy, generalized to
//! the async single-node client and used both as the multi-key splitter's
//! fan-out mechanism and as the public `batch()`/`multi()` entry point.

use std::collections::HashMap;

use redis::{Cmd, RedisResult, Value};

use crate::node::{Connect, NodeAddr, NodeClient};
use crate::routing::{KeyRouter, RoutePolicy};

/// One command queued for dispatch, alongside the routing key that will
/// select its destination node.
struct QueuedCommand {
    key: Vec<u8>,
    cmd: Cmd,
    read_only: bool,
}

/// A pipelined batch of commands bound to one cluster. Commands are queued
/// with [`ClusterBatch::add`] and dispatched together with
/// [`ClusterBatch::execute`].
pub struct ClusterBatch<C> {
    router: std::sync::Arc<KeyRouter<C>>,
    queued: Vec<QueuedCommand>,
}

impl<C: Connect> ClusterBatch<C> {
    pub(crate) fn new(router: std::sync::Arc<KeyRouter<C>>) -> Self {
        ClusterBatch {
            router,
            queued: Vec::new(),
        }
    }

    /// Queues `cmd`, routed by `key`, for the next [`execute`](Self::execute).
    pub fn add(&mut self, key: impl Into<Vec<u8>>, cmd: Cmd, read_only: bool) -> &mut Self {
        self.queued.push(QueuedCommand {
            key: key.into(),
            cmd,
            read_only,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Groups queued commands by destination node, pipelines each group,
    /// and returns the results in original submission order. A failure
    /// dispatching any one node's group propagates unchanged (spec.md
    /// §4.F: "a batch-level error propagates unchanged").
    pub async fn execute(&self) -> RedisResult<Vec<Value>> {
        let mut groups: HashMap<NodeAddr, (NodeClient<C>, Vec<usize>)> = HashMap::new();

        for (idx, queued) in self.queued.iter().enumerate() {
            let policy = RoutePolicy {
                read_only: queued.read_only,
            };
            let node = match self.router.select(&queued.key, policy).await {
                Some(node) => node,
                None => {
                    return Err(crate::error::couldnt_get_client());
                }
            };
            groups
                .entry(node.addr().clone())
                .or_insert_with(|| (node, Vec::new()))
                .1
                .push(idx);
        }

        let mut results = vec![Value::Nil; self.queued.len()];
        let futures = groups.into_values().map(|(node, indices)| {
            let mut pipe = redis::pipe();
            for &idx in &indices {
                pipe.add_command(self.queued[idx].cmd.clone());
            }
            let mut conn = node.connection();
            async move {
                let values: Vec<Value> = pipe.query_async(&mut conn).await?;
                Ok::<_, redis::RedisError>((indices, values))
            }
        });

        for outcome in futures::future::join_all(futures).await {
            let (indices, values) = outcome?;
            for (idx, value) in indices.into_iter().zip(values) {
                results[idx] = value;
            }
        }

        Ok(results)
    }
}
