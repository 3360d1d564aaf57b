//! Public API: configuration, the cluster client itself, and its handful
//! of thin per-command wrappers (spec.md §6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{cmd, Cmd, IntoConnectionInfo, RedisResult, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::discovery::{SlotDiscovery, DEFAULT_MAX_QUEUE_LENGTH};
use crate::events::{ClusterEvent, EventBus};
use crate::executor::CommandExecutor;
use crate::node::{BoxFuture, Connect, ConnectionFactory, NodeAddr};
use crate::pool::NodePool;
use crate::routing::{KeyRouter, ReplicaReadPolicy};
use crate::splitter;
use crate::{batch::ClusterBatch, splitter::MultiKeySpec};

/// A seed endpoint, as supplied in [`ClusterClientConfig::servers`].
#[derive(Debug, Clone)]
pub struct SeedServer {
    pub host: String,
    pub port: u16,
}

impl SeedServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SeedServer { host: host.into(), port }
    }

    fn addr(&self) -> NodeAddr {
        NodeAddr::from(format!("{}:{}", self.host, self.port))
    }
}

/// Builds a [`ClusterClientConfig`] (spec.md §6).
pub struct ClusterClientBuilder<C = MultiplexedConnection> {
    servers: Vec<SeedServer>,
    create_client: Option<ConnectionFactory<C>>,
    slot_interval: Option<Duration>,
    ready_timeout: Option<Duration>,
    max_queue_length: usize,
    queue_shift: bool,
    replica_policy: ReplicaReadPolicy,
}

impl<C> ClusterClientBuilder<C> {
    pub fn new(servers: Vec<SeedServer>) -> Self {
        ClusterClientBuilder {
            servers,
            create_client: None,
            slot_interval: None,
            ready_timeout: None,
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            queue_shift: true,
            replica_policy: ReplicaReadPolicy::Never,
        }
    }

    /// Overrides how a connection to a given `host:port` is created. By
    /// default (see [`ClusterClient::new`]) this opens a
    /// [`MultiplexedConnection`].
    pub fn create_client(mut self, factory: ConnectionFactory<C>) -> Self {
        self.create_client = Some(factory);
        self
    }

    /// Re-runs discovery every `interval` in the background, in addition to
    /// the refreshes redirects and empty-map lookups trigger on their own.
    pub fn slot_interval(mut self, interval: Duration) -> Self {
        self.slot_interval = Some(interval);
        self
    }

    /// Bounds how long the first discovery waits for a node to become
    /// ready. Absent (the default) means wait forever.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Bound on the pending-refresh queue (default 16).
    pub fn max_queue_length(mut self, max: usize) -> Self {
        self.max_queue_length = max;
        self
    }

    /// `true` (default): overflow evicts the eldest queued waiter.
    /// `false`: overflow rejects the newcomer instead. See spec.md §9's
    /// "overflow policy naming" open question — the source's `queueShift`
    /// name is kept here for continuity even though it reads backwards.
    pub fn queue_shift(mut self, queue_shift: bool) -> Self {
        self.queue_shift = queue_shift;
        self
    }

    pub fn replica_read_policy(mut self, policy: ReplicaReadPolicy) -> Self {
        self.replica_policy = policy;
        self
    }

    pub fn build(self) -> ClusterClientConfig<C> {
        ClusterClientConfig {
            servers: self.servers,
            create_client: self.create_client,
            slot_interval: self.slot_interval,
            ready_timeout: self.ready_timeout,
            max_queue_length: self.max_queue_length,
            queue_shift: self.queue_shift,
            replica_policy: self.replica_policy,
        }
    }
}

pub struct ClusterClientConfig<C = MultiplexedConnection> {
    pub servers: Vec<SeedServer>,
    pub create_client: Option<ConnectionFactory<C>>,
    pub slot_interval: Option<Duration>,
    pub ready_timeout: Option<Duration>,
    pub max_queue_length: usize,
    pub queue_shift: bool,
    pub replica_policy: ReplicaReadPolicy,
}

fn default_factory() -> ConnectionFactory<MultiplexedConnection> {
    Arc::new(|addr: NodeAddr| -> BoxFuture<'static, RedisResult<MultiplexedConnection>> {
        Box::pin(async move {
            let info = format!("redis://{addr}").into_connection_info()?;
            let client = redis::Client::open(info)?;
            client.get_multiplexed_tokio_connection().await
        })
    })
}

/// A cluster-aware key/value client: slot-topology discovery and
/// maintenance, per-key routing, redirect/retry handling, and multi-key
/// command fan-out, all sitting in front of a caller-supplied single-node
/// client (spec.md §1-2).
pub struct ClusterClient<C = MultiplexedConnection> {
    pool: Arc<NodePool<C>>,
    router: Arc<KeyRouter<C>>,
    executor: Arc<CommandExecutor<C>>,
    events: EventBus,
    quitting: Arc<AtomicBool>,
    periodic_refresh: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClusterClient<MultiplexedConnection> {
    /// Builds a client using the default single-node client
    /// (`redis::aio::MultiplexedConnection`).
    pub async fn new(config: ClusterClientConfig<MultiplexedConnection>) -> RedisResult<Self> {
        let factory = config.create_client.clone().unwrap_or_else(default_factory);
        Self::with_factory(config, factory).await
    }
}

impl<C: Connect> ClusterClient<C> {
    /// Builds a client with an explicit connection factory — the hook test
    /// doubles use to avoid a live cluster (spec.md §4.A).
    pub async fn with_factory(
        config: ClusterClientConfig<C>,
        factory: ConnectionFactory<C>,
    ) -> RedisResult<Self> {
        let events = EventBus::new();
        let pool = Arc::new(NodePool::new(factory, events.clone()));
        let slot_map = Arc::new(crate::slot_map::SlotMap::new());

        let seed_results = futures::future::join_all(
            config
                .servers
                .iter()
                .map(|server| pool.get(server.addr())),
        )
        .await;
        if seed_results.iter().all(Result::is_err) {
            return Err(crate::error::couldnt_get_client());
        }

        let router = Arc::new(KeyRouter::new(slot_map.clone(), pool.clone(), config.replica_policy));
        let discovery = Arc::new(SlotDiscovery::new(
            pool.clone(),
            slot_map.clone(),
            events.clone(),
            config.max_queue_length,
            config.queue_shift,
            config.ready_timeout,
        ));
        let executor = Arc::new(CommandExecutor::new(
            router.clone(),
            pool.clone(),
            discovery.clone(),
            slot_map.clone(),
            events.clone(),
        ));

        discovery.refresh().await?;

        let quitting = Arc::new(AtomicBool::new(false));
        let periodic_refresh = config.slot_interval.map(|interval| {
            let discovery = discovery.clone();
            let quitting = quitting.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if quitting.load(Ordering::Acquire) {
                        return;
                    }
                    if let Err(err) = discovery.refresh().await {
                        warn!(%err, "periodic slot refresh failed");
                    }
                }
            })
        });

        Ok(ClusterClient {
            pool,
            router,
            executor,
            events,
            quitting,
            periodic_refresh: std::sync::Mutex::new(periodic_refresh),
        })
    }

    /// Subscribes to lifecycle/error events (spec.md §4.G / §6).
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Runs an arbitrary single-key command. Most callers use the thin
    /// wrappers below instead; this is the generic escape hatch spec.md's
    /// Design Notes describe as the statically-typed answer to the
    /// source's dynamically-attached per-command methods.
    pub async fn call(&self, cmd_name: &str, key: &[u8], cmd: &Cmd, read_only: bool) -> RedisResult<Value> {
        if self.quitting.load(Ordering::Acquire) {
            return Err(crate::error::cluster_is_quitting());
        }
        self.executor.exec(cmd_name, cmd, Some(key), read_only).await
    }

    /// Runs a multi-key command, splitting across slots when its keys
    /// don't share one (spec.md §4.F). `keys_and_args` is the `interval`-
    /// sized flattening `lookup` expects for `cmd_name`.
    pub async fn call_multi(&self, cmd_name: &str, keys_and_args: &[Vec<u8>]) -> RedisResult<Value> {
        if self.quitting.load(Ordering::Acquire) {
            return Err(crate::error::cluster_is_quitting());
        }
        let spec: MultiKeySpec = splitter::lookup(cmd_name).ok_or_else(|| {
            crate::error::no_key_for_command(cmd_name)
        })?;
        splitter::exec_multi(cmd_name, &spec, keys_and_args, &self.executor, &self.router).await
    }

    pub async fn get(&self, key: impl Into<Vec<u8>>) -> RedisResult<Value> {
        let key = key.into();
        let mut c = cmd("GET");
        c.arg(&key);
        self.call("GET", &key, &c, true).await
    }

    pub async fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> RedisResult<Value> {
        let key = key.into();
        let mut c = cmd("SET");
        c.arg(&key).arg(value.into());
        self.call("SET", &key, &c, false).await
    }

    pub async fn mget(&self, keys: &[Vec<u8>]) -> RedisResult<Value> {
        self.call_multi("MGET", keys).await
    }

    pub async fn mset(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> RedisResult<Value> {
        let flat: Vec<Vec<u8>> = pairs
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .collect();
        self.call_multi("MSET", &flat).await
    }

    pub async fn del(&self, keys: &[Vec<u8>]) -> RedisResult<Value> {
        self.call_multi("DEL", keys).await
    }

    /// A pipelined batch bound to this cluster (spec.md §6 `batch()`).
    pub fn batch(&self) -> ClusterBatch<C> {
        ClusterBatch::new(self.router.clone())
    }

    /// Alias for [`batch`](Self::batch), matching the source's naming.
    pub fn multi(&self) -> ClusterBatch<C> {
        self.batch()
    }

    /// Terminates all connections. New commands submitted afterward fail
    /// with `cluster is quitting` (spec.md §4.G).
    pub async fn quit(&self) {
        self.quitting.store(true, Ordering::Release);
        self.pool.quit();
        if let Some(handle) = self.periodic_refresh.lock().unwrap().take() {
            handle.abort();
        }
    }
}
