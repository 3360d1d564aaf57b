//! A single node endpoint and the connection wrapped around it (spec.md
//! §3 "Node endpoint" / "Node client").

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arcstr::ArcStr;
use derivative::Derivative;
use redis::aio::ConnectionLike;
use redis::{cmd, RedisResult};

/// `host:port`, canonical and cheap to clone — it is the key used by both
/// the connection pool and the slot map.
pub type NodeAddr = ArcStr;

/// Bound satisfied by whatever the single-node client provides. The routing
/// engine never constructs connections itself; it always goes through a
/// caller-supplied factory (spec.md §4.A), so this is the only contract it
/// places on that external collaborator.
pub trait Connect: ConnectionLike + Clone + Send + Sync + Unpin + 'static {}
impl<T> Connect for T where T: ConnectionLike + Clone + Send + Sync + Unpin + 'static {}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Factory for creating a connection to a given `host:port`, forwarding
/// whatever opaque options the caller configured. Mirrors the `createClient`
/// config field in spec.md §6.
pub type ConnectionFactory<C> =
    Arc<dyn Fn(NodeAddr) -> BoxFuture<'static, RedisResult<C>> + Send + Sync>;

/// Wraps one underlying single-node client. The only state the routing
/// engine itself needs to track per node is whether the last routing
/// directive sent to it was "enter read-from-replica mode" (spec.md §3,
/// invariant on `readModeReplica`), so that mode switches are issued only
/// when they actually change anything.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct NodeClient<C> {
    addr: NodeAddr,
    #[derivative(Debug = "ignore")]
    conn: C,
    read_mode_replica: Arc<AtomicBool>,
}

impl<C: Connect> NodeClient<C> {
    pub(crate) fn new(addr: NodeAddr, conn: C) -> Self {
        NodeClient {
            addr,
            conn,
            read_mode_replica: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    pub(crate) fn connection(&self) -> C {
        self.conn.clone()
    }

    pub(crate) fn is_reading_from_replica(&self) -> bool {
        self.read_mode_replica.load(Ordering::Acquire)
    }

    /// Reconciles this node's read mode with `want_replica_mode` (spec.md
    /// §4.D step 5). The directive is sent and sequenced ahead of whatever
    /// command the caller issues next on this same node — detaching it via
    /// `tokio::spawn` would race the caller's own dispatch on a
    /// multi-threaded runtime and could land the two out of order on the
    /// wire. Its reply is still never inspected — see DESIGN.md's note on
    /// mode-switch reply handling.
    pub(crate) async fn reconcile_read_mode(&self, want_replica_mode: bool) {
        let currently = self.read_mode_replica.swap(want_replica_mode, Ordering::AcqRel);
        if currently == want_replica_mode {
            return;
        }
        let mut conn = self.conn.clone();
        let directive = if want_replica_mode { "READONLY" } else { "READWRITE" };
        let _ = cmd(directive).query_async::<_, ()>(&mut conn).await;
    }
}
