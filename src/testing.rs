//! Shared helpers for unit tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::connection::ConnectionHandle;
use crate::hub::Hub;
use crate::store::MemoryStore;
use crate::types::{ConnectionId, Frame, UserId};

const WAIT: Duration = Duration::from_secs(2);

/// Store with three users: alice (1), bob (2), carol (3)
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.add_user(UserId(1), "alice", "red");
    store.add_user(UserId(2), "bob", "green");
    store.add_user(UserId(3), "carol", "blue");
    Arc::new(store)
}

/// Hub with its control loop running
pub fn spawn_hub(store: Arc<MemoryStore>) -> Hub {
    let (hub, server) = Hub::new(store);
    tokio::spawn(server.run());
    hub
}

/// A fake connection: the registry half and the queue it feeds
pub fn fake_connection(user: i64, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ConnectionHandle::new(ConnectionId::new(), UserId(user), tx), rx)
}

/// Next frame, parsed
pub async fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Value {
    let frame = timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("queue closed");
    serde_json::from_str(&frame).expect("frame is not JSON")
}

/// Skip frames until one of the given type arrives
pub async fn next_of_type(rx: &mut mpsc::Receiver<Frame>, kind: &str) -> Value {
    loop {
        let value = next_frame(rx).await;
        if value["type"] == kind {
            return value;
        }
    }
}

/// Register, wait until the hub has processed it, and drop the
/// presence frames it produced
pub async fn register(hub: &Hub, user: i64) -> (ConnectionId, mpsc::Receiver<Frame>) {
    let (handle, mut rx) = fake_connection(user, 64);
    let id = handle.id;
    hub.register(handle).await.unwrap();
    next_of_type(&mut rx, "online_users").await;
    drain(&mut rx).await;
    (id, rx)
}

/// Let the hub settle, then discard everything queued
pub async fn drain(rx: &mut mpsc::Receiver<Frame>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while rx.try_recv().is_ok() {}
}

/// Assert nothing else is queued after letting the hub settle
pub async fn assert_quiet(rx: &mut mpsc::Receiver<Frame>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(frame) = rx.try_recv() {
        panic!("unexpected frame: {}", frame);
    }
}

/// IDs listed in an `online_users` frame
pub fn online_ids(value: &Value) -> Vec<i64> {
    value["data"]["users"]
        .as_array()
        .map(|users| users.iter().filter_map(|u| u["id"].as_i64()).collect())
        .unwrap_or_default()
}
