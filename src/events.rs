//! Lifecycle & Events (spec.md §4.G).
//!
//! The source models this with an event-bus: `ready`, `unready`, `end`,
//! `connectionError`, `error`. Per DESIGN NOTES §9 ("Event emission vs.
//! result delivery"), that surface becomes a small broadcast channel with
//! well-known topics here, while per-call results are returned directly
//! from `async fn`s instead of delivered through callbacks.

use arcstr::ArcStr;
use tokio::sync::broadcast;

/// A lifecycle or error notification. Errors carry their `Display`
/// rendering rather than the original [`redis::RedisError`] since the
/// latter isn't `Clone` and this channel may have multiple subscribers.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// The first node client came up.
    Ready,
    /// Every node client went down after having been ready at least once.
    Unready,
    /// Every node client has ended (only emitted after `quit`).
    End,
    /// A node's connection broke or became uncertain; the pool entry for
    /// `addr` was tombstoned and a slot refresh was triggered.
    ConnectionError { addr: ArcStr, error: String },
    /// Any other error not otherwise routed to a caller (e.g. because the
    /// caller supplied no result channel).
    Error { addr: Option<ArcStr>, error: String },
}

/// Owns the broadcast sender; cloned cheaply, shared across every
/// component that needs to emit or observe lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        // A small lag-tolerant backlog; events are advisory, not a queue of
        // work, so a slow subscriber dropping the oldest entries is fine.
        let (sender, _) = broadcast::channel(64);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: ClusterEvent) {
        // No one has to be listening.
        let _ = self.sender.send(event);
    }
}
