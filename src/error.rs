//! Constructors for the routing engine's own error conditions.
//!
//! Everything else flows through as whatever [`redis::RedisError`] the
//! single-node client (or the server) produced; these are the handful of
//! errors that originate in the routing engine itself (see spec.md §7,
//! "Lifecycle errors" and "Discovery exhaustion").

use redis::{ErrorKind, RedisError};

pub(crate) fn no_key_for_command(cmd: &str) -> RedisError {
    RedisError::from((
        ErrorKind::ClientError,
        "no key for command",
        cmd.to_string(),
    ))
}

pub(crate) fn couldnt_get_client() -> RedisError {
    RedisError::from((ErrorKind::ClientError, "couldn't get client"))
}

pub(crate) fn cluster_is_quitting() -> RedisError {
    RedisError::from((ErrorKind::ClientError, "cluster is quitting"))
}

pub(crate) fn ready_timeout_reached() -> RedisError {
    RedisError::from((ErrorKind::IoError, "ready timeout reached"))
}

pub(crate) fn max_slot_queue_length_reached() -> RedisError {
    RedisError::from((ErrorKind::ClientError, "max slot queue length reached"))
}

pub(crate) fn couldnt_get_slot_allocation(per_node_errors: &[(String, RedisError)]) -> RedisError {
    let detail = per_node_errors
        .iter()
        .map(|(addr, err)| format!("{addr}: {err}"))
        .collect::<Vec<_>>()
        .join("; ");
    RedisError::from((
        ErrorKind::ClusterDown,
        "couldn't get slot allocation",
        detail,
    ))
}

/// True for the errors the pool treats as "broken/uncertain connection":
/// the ones that should tombstone the pool entry and kick off a refresh,
/// per spec.md §4.A.
pub(crate) fn is_connection_broken(err: &RedisError) -> bool {
    if err.kind() == ErrorKind::IoError || err.is_connection_dropped() {
        return true;
    }
    let msg = err.to_string();
    msg.contains("connection to") && msg.contains("failed")
}
