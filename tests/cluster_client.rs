//! End-to-end wiring test: seed connections, slot discovery, and routed
//! command execution, all driven through a hand-rolled in-memory
//! `ConnectionLike` double instead of a live cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use redis::aio::ConnectionLike;
use redis::{Cmd, RedisFuture, Value};
use slotrouter::{ClusterClientBuilder, SeedServer};

/// Two-node topology covering the whole slot space, split in half.
fn cluster_slots_reply() -> Value {
    Value::Array(vec![
        Value::Array(vec![
            Value::Int(0),
            Value::Int(8191),
            Value::Array(vec![Value::BulkString(b"node-a".to_vec()), Value::Int(7000)]),
        ]),
        Value::Array(vec![
            Value::Int(8192),
            Value::Int(16383),
            Value::Array(vec![Value::BulkString(b"node-b".to_vec()), Value::Int(7000)]),
        ]),
    ])
}

fn command_name(cmd: &Cmd) -> String {
    let mut buf = Vec::new();
    cmd.write_packed_command(&mut buf);
    String::from_utf8_lossy(&buf).to_uppercase()
}

#[derive(Clone)]
struct FakeConnection {
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl FakeConnection {
    fn new() -> Self {
        FakeConnection {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn record(&self, name: &str) {
        *self.calls.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
    }
}

impl ConnectionLike for FakeConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        let name = command_name(cmd);
        Box::pin(async move {
            let reply = if name.contains("CLUSTER") {
                self.record("CLUSTER");
                cluster_slots_reply()
            } else if name.contains("READONLY") || name.contains("READWRITE") || name.contains("ASKING") {
                self.record("DIRECTIVE");
                Value::Okay
            } else if name.contains("SET") {
                self.record("SET");
                Value::Okay
            } else if name.contains("GET") {
                self.record("GET");
                Value::BulkString(b"pong".to_vec())
            } else {
                self.record("OTHER");
                Value::Nil
            };
            Ok(reply)
        })
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        _cmd: &'a redis::Pipeline,
        _offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        // This test exercises single-command GET/SET routing only; no
        // scenario here dispatches a pipeline through this double.
        Box::pin(async move { Ok(vec![Value::Okay; count]) })
    }

    fn get_db(&self) -> i64 {
        0
    }
}

#[tokio::test]
async fn builds_client_discovers_slots_and_routes_commands() {
    let config = ClusterClientBuilder::new(vec![SeedServer::new("node-a", 7000)]).build();

    let client = slotrouter::ClusterClient::with_factory(config, Arc::new(|_addr| {
        Box::pin(async move { Ok::<_, redis::RedisError>(FakeConnection::new()) })
    }))
    .await
    .expect("client should build against the fake cluster");

    let value = client.get("any-key").await.expect("get should succeed");
    assert_eq!(value, Value::BulkString(b"pong".to_vec()));

    let value = client.set("any-key", "v").await.expect("set should succeed");
    assert_eq!(value, Value::Okay);

    client.quit().await;
    assert!(client.get("any-key").await.is_err());
}
