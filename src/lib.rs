//! Routing and reliability client for a sharded, replicated key/value
//! cluster: 16384 hash-slot topology discovery, hash-tag-aware key routing,
//! `MOVED`/`ASK` redirect and `TRYAGAIN`/`CLUSTERDOWN` retry handling, and
//! multi-key command fan-out, all sitting in front of a caller-supplied
//! single-node client.
//!
//! [`ClusterClient`] is the entry point. It owns a [`pool::NodePool`] of
//! per-endpoint connections, a [`slot_map::SlotMap`] snapshot of the current
//! topology kept current by [`discovery::SlotDiscovery`], a
//! [`routing::KeyRouter`] that turns a command's key into a destination
//! node, and a [`executor::CommandExecutor`] that drives the redirect/retry
//! state machine for individual commands. [`batch::ClusterBatch`] and
//! [`splitter`] build on the same router for pipelined and multi-key work.

mod batch;
mod client;
mod discovery;
mod error;
mod events;
mod executor;
mod node;
mod pool;
mod routing;
mod slot_map;
mod splitter;

pub use batch::ClusterBatch;
pub use client::{ClusterClient, ClusterClientBuilder, ClusterClientConfig, SeedServer};
pub use events::ClusterEvent;
pub use executor::MAX_ATTEMPTS;
pub use node::{Connect, ConnectionFactory, NodeAddr};
pub use routing::{ReplicaReadPolicy, RoutePolicy};
pub use slot_map::SLOT_SIZE;

pub use redis;
