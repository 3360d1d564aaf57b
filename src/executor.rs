//! Command Executor (spec.md §4.E): dispatches one command to a selected
//! node and drives the redirect/retry state machine.

use std::sync::Arc;
use std::time::Duration;

use redis::{Cmd, ErrorKind, RedisError, RedisResult, Value};
use tracing::{trace, warn};

use crate::discovery::SlotDiscovery;
use crate::error;
use crate::events::{ClusterEvent, EventBus};
use crate::node::{Connect, NodeAddr};
use crate::pool::NodePool;
use crate::routing::{KeyRouter, RoutePolicy};
use crate::slot_map::SlotMap;

/// Hard cap on the number of times a single command may be dispatched
/// across redirects and retries (spec.md §4.E, §8).
pub const MAX_ATTEMPTS: u32 = 16;

enum Redirect {
    Moved(NodeAddr),
    Ask(NodeAddr),
}

/// Exponential backoff for `TRYAGAIN`/`CLUSTERDOWN`, per spec.md §4.E's
/// table: `10ms * 2^(16 - max(attempts_remaining, 9))`, capped at 1280ms.
pub fn backoff_for(attempts_remaining: u32) -> Duration {
    let exponent = MAX_ATTEMPTS.saturating_sub(attempts_remaining.max(9)).min(7);
    Duration::from_millis(10u64.saturating_mul(1u64 << exponent))
}

pub struct CommandExecutor<C> {
    router: Arc<KeyRouter<C>>,
    pool: Arc<NodePool<C>>,
    discovery: Arc<SlotDiscovery<C>>,
    slot_map: Arc<SlotMap>,
    events: EventBus,
}

impl<C: Connect> CommandExecutor<C> {
    pub fn new(
        router: Arc<KeyRouter<C>>,
        pool: Arc<NodePool<C>>,
        discovery: Arc<SlotDiscovery<C>>,
        slot_map: Arc<SlotMap>,
        events: EventBus,
    ) -> Self {
        CommandExecutor {
            router,
            pool,
            discovery,
            slot_map,
            events,
        }
    }

    /// Runs `cmd`, routed by `key`, honoring `read_only` (spec.md §4.E).
    pub async fn exec(&self, cmd_name: &str, cmd: &Cmd, key: Option<&[u8]>, read_only: bool) -> RedisResult<Value> {
        let key = match key {
            Some(key) if !key.is_empty() => key,
            _ => return Err(error::no_key_for_command(cmd_name)),
        };

        if self.slot_map.is_empty() {
            self.discovery.refresh().await?;
        }

        let mut redirect = None::<Redirect>;
        let mut last_err: Option<RedisError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            let attempts_remaining = MAX_ATTEMPTS - attempt;
            let asking = matches!(redirect, Some(Redirect::Ask(_)));

            let node = match redirect.take() {
                Some(Redirect::Moved(addr)) | Some(Redirect::Ask(addr)) => {
                    match self.pool.get(addr).await {
                        Ok(node) => node,
                        Err(err) => return Err(err),
                    }
                }
                None => match self.router.select(key, RoutePolicy { read_only }).await {
                    Some(node) => node,
                    None => return Err(error::couldnt_get_client()),
                },
            };

            let mut conn = node.connection();
            if asking {
                let _ = redis::cmd("ASKING").query_async::<_, ()>(&mut conn).await;
            }

            match cmd.query_async::<_, Value>(&mut conn).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    trace!(attempt, kind = ?err.kind(), "command attempt failed");
                    if error::is_connection_broken(&err) {
                        self.pool.tombstone(node.addr(), &err);
                        self.spawn_background_refresh();
                        // spec.md §7: a broken/uncertain connection surfaces to
                        // the caller immediately; it does not re-enter the
                        // redirect/retry walk below.
                        return Err(err);
                    }

                    match err.kind() {
                        ErrorKind::Ask => {
                            redirect = err.redirect_node().map(|(addr, _slot)| Redirect::Ask(addr.into()));
                        }
                        ErrorKind::Moved => {
                            self.spawn_background_refresh();
                            redirect = err.redirect_node().map(|(addr, _slot)| Redirect::Moved(addr.into()));
                        }
                        ErrorKind::TryAgain | ErrorKind::ClusterDown => {
                            tokio::time::sleep(backoff_for(attempts_remaining)).await;
                        }
                        _ => {
                            if !err.is_retryable() {
                                return Err(err);
                            }
                        }
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(error::couldnt_get_client))
    }

    fn spawn_background_refresh(&self) {
        let discovery = self.discovery.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(err) = discovery.refresh().await {
                warn!(%err, "background slot refresh failed");
                events.emit(ClusterEvent::Error {
                    addr: None,
                    error: err.to_string(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ramps_up_and_caps_at_1280ms() {
        assert_eq!(backoff_for(MAX_ATTEMPTS), Duration::from_millis(10));
        assert_eq!(backoff_for(9), Duration::from_millis(1280));
        assert_eq!(backoff_for(1), Duration::from_millis(1280));
        // Monotonically non-decreasing as attempts_remaining falls toward 9.
        let mut prev = Duration::from_millis(0);
        for remaining in (9..=MAX_ATTEMPTS).rev() {
            let d = backoff_for(remaining);
            assert!(d >= prev);
            assert!(d <= Duration::from_millis(1280));
            prev = d;
        }
    }
}
