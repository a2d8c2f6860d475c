//! Hub actor implementation
//!
//! `HubServer` is the single control loop that owns every registry
//! mutation and every presence decision. `Hub` is the cloneable handle the
//! rest of the process uses: it feeds the loop through a command channel
//! and reads the registry under a lock for addressed delivery.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{AppError, DeliveryError};
use crate::message::ServerEvent;
use crate::presence;
use crate::registry::{Departure, Registry};
use crate::store::Store;
use crate::types::{ConnectionId, Frame, UserId};

/// Channel buffer size for hub commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Commands accepted by the control loop
#[derive(Debug)]
pub enum HubCommand {
    /// A connection passed authentication and is ready for traffic.
    /// `reply` fires once the connection is addressable in the registry.
    Register {
        handle: ConnectionHandle,
        reply: oneshot::Sender<()>,
    },
    /// A connection is gone (or must go); no-op if already removed
    Unregister(ConnectionId),
    /// Deliver a serialized envelope to every live connection
    Broadcast(Frame),
}

/// Handle to the hub
///
/// Cheap to clone. The control loop runs for as long as any handle exists.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    registry: Arc<RwLock<Registry>>,
    store: Arc<dyn Store>,
}

impl Hub {
    /// Create the handle and the control loop that serves it
    ///
    /// The caller spawns `HubServer::run`.
    pub fn new(store: Arc<dyn Store>) -> (Hub, HubServer) {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let registry = Arc::new(RwLock::new(Registry::new()));
        let hub = Hub {
            commands,
            registry: registry.clone(),
            store: store.clone(),
        };
        let server = HubServer {
            receiver,
            registry,
            store,
        };
        (hub, server)
    }

    /// Register a connection and wait until the registry holds it
    ///
    /// Addressed sends to the connection succeed from the moment this
    /// returns, even while presence broadcasts are still going out.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), AppError> {
        let (reply, registered) = oneshot::channel();
        self.send_command(HubCommand::Register { handle, reply }).await?;
        registered.await.map_err(|_| AppError::HubClosed)
    }

    pub async fn unregister(&self, id: ConnectionId) -> Result<(), AppError> {
        self.send_command(HubCommand::Unregister(id)).await
    }

    /// Fan a serialized envelope out to every live connection
    pub async fn broadcast(&self, frame: Frame) -> Result<(), AppError> {
        self.send_command(HubCommand::Broadcast(frame)).await
    }

    /// Deliver to a user's current connection
    pub async fn send_to_user(&self, user_id: UserId, frame: Frame) -> Result<(), DeliveryError> {
        let handle = self.registry.read().for_user(user_id).cloned();
        self.deliver(handle, frame).await
    }

    /// Deliver to one specific connection
    pub async fn send_to_connection(
        &self,
        id: ConnectionId,
        frame: Frame,
    ) -> Result<(), DeliveryError> {
        let handle = self.registry.read().get(id).cloned();
        self.deliver(handle, frame).await
    }

    /// Current connection of a user, if any
    pub fn connection_for(&self, user_id: UserId) -> Option<ConnectionId> {
        self.registry.read().for_user(user_id).map(|conn| conn.id)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registry.read().contains(id)
    }

    /// Live connections, superseded ones included
    pub fn connection_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn online_user_count(&self) -> usize {
        self.registry.read().user_count()
    }

    /// Persistence collaborator shared with the event handlers
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn send_command(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.commands.send(cmd).await.map_err(|_| AppError::HubClosed)
    }

    /// Non-blocking enqueue; a full queue gets the connection unregistered
    async fn deliver(
        &self,
        handle: Option<ConnectionHandle>,
        frame: Frame,
    ) -> Result<(), DeliveryError> {
        let Some(handle) = handle else {
            return Err(DeliveryError::NotConnected);
        };
        let result = handle.try_deliver(frame);
        if result == Err(DeliveryError::QueueFull) {
            warn!(
                user_id = %handle.user_id,
                connection_id = %handle.id,
                "Outbound queue full, evicting connection"
            );
            let id = handle.id;
            drop(handle);
            if self.unregister(id).await.is_err() {
                debug!("Hub closed, eviction of {} skipped", id);
            }
        }
        result
    }
}

/// The hub control loop
///
/// Sole writer of the registry. Never fails: per-connection and per-event
/// errors are logged and the loop moves on.
pub struct HubServer {
    receiver: mpsc::Receiver<HubCommand>,
    registry: Arc<RwLock<Registry>>,
    store: Arc<dyn Store>,
}

impl HubServer {
    /// Run the control loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { handle, reply } => {
                self.handle_register(handle, reply).await;
            }
            HubCommand::Unregister(id) => {
                self.handle_unregister(id).await;
            }
            HubCommand::Broadcast(frame) => {
                let departures = self.deliver_all(&frame);
                self.settle(departures).await;
            }
        }
    }

    async fn handle_register(&mut self, handle: ConnectionHandle, reply: oneshot::Sender<()>) {
        let (id, user_id) = (handle.id, handle.user_id);
        let (superseded, came_online) = {
            let mut registry = self.registry.write();
            let was_online = registry.is_online(user_id);
            (registry.insert(handle), !was_online)
        };
        // Registering side may have given up waiting
        let _ = reply.send(());

        info!(user_id = %user_id, connection_id = %id, "Connection registered");
        if let Some(prev) = superseded {
            info!(user_id = %user_id, connection_id = %prev, "Connection superseded");
        }

        if let Err(e) = self.store.mark_user_online(user_id).await {
            error!(user_id = %user_id, "Failed to mark user online: {}", e);
        }

        let mut departures = self.broadcast_online_users().await;
        if came_online {
            departures.extend(self.announce(user_id, true).await);
        }
        self.settle(departures).await;

        let (connections, users) = {
            let registry = self.registry.read();
            (registry.len(), registry.user_count())
        };
        debug!("Total connections: {}, online users: {}", connections, users);
    }

    async fn handle_unregister(&mut self, id: ConnectionId) {
        let removed = self.registry.write().remove(id);
        let Some(departure) = removed else {
            debug!(connection_id = %id, "Unregister for unknown connection ignored");
            return;
        };

        self.settle(vec![departure]).await;
    }

    /// Finish removals: persist offline state and publish presence
    ///
    /// Each batch of departures gets one `online_users` broadcast. That
    /// broadcast may itself evict stalled connections, which form the
    /// next batch; the registry only shrinks, so this terminates.
    async fn settle(&mut self, mut departures: Vec<Departure>) {
        while !departures.is_empty() {
            let mut gone_offline = Vec::new();
            for departure in departures.drain(..) {
                let user_id = departure.handle.user_id;
                info!(
                    user_id = %user_id,
                    connection_id = %departure.handle.id,
                    "Connection unregistered"
                );
                if departure.user_offline {
                    if let Err(e) = self.store.mark_user_offline(user_id).await {
                        error!(user_id = %user_id, "Failed to mark user offline: {}", e);
                    }
                    gone_offline.push(user_id);
                }
            }

            let mut next = self.broadcast_online_users().await;
            for user_id in gone_offline {
                next.extend(self.announce(user_id, false).await);
            }
            departures = next;
        }
    }

    async fn broadcast_online_users(&self) -> Vec<Departure> {
        let records = match self.store.list_online_users().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to list online users: {}", e);
                return Vec::new();
            }
        };
        let event = {
            let registry = self.registry.read();
            presence::online_users(records, &registry)
        };
        self.broadcast_event(&ServerEvent::OnlineUsers(event))
    }

    /// Broadcast `user_joined` or `user_left`
    async fn announce(&self, user_id: UserId, joined: bool) -> Vec<Departure> {
        let display = match self.store.user_display(user_id).await {
            Ok(display) => display,
            Err(e) => {
                error!(user_id = %user_id, "Failed to load user for presence: {}", e);
                return Vec::new();
            }
        };
        let payload = presence::user_presence(user_id, display);
        let event = if joined {
            ServerEvent::UserJoined(payload)
        } else {
            ServerEvent::UserLeft(payload)
        };
        self.broadcast_event(&event)
    }

    fn broadcast_event(&self, event: &ServerEvent) -> Vec<Departure> {
        match event.encode() {
            Ok(frame) => self.deliver_all(&frame),
            Err(e) => {
                error!("Failed to serialize {}: {}", event.kind(), e);
                Vec::new()
            }
        }
    }

    fn deliver_all(&self, frame: &Frame) -> Vec<Departure> {
        let departures = self.registry.write().deliver_all(frame);
        for departure in &departures {
            warn!(
                user_id = %departure.handle.user_id,
                connection_id = %departure.handle.id,
                "Connection cannot keep up, evicted"
            );
        }
        departures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn types_of(values: &[serde_json::Value]) -> Vec<&str> {
        values.iter().filter_map(|v| v["type"].as_str()).collect()
    }

    #[tokio::test]
    async fn test_register_broadcasts_online_users() {
        let hub = spawn_hub(seeded_store());
        let (handle, mut rx) = fake_connection(1, 16);
        let id = handle.id;

        hub.register(handle).await.unwrap();

        let online = next_frame(&mut rx).await;
        assert_eq!(online["type"], "online_users");
        assert_eq!(online_ids(&online), vec![1]);

        let joined = next_frame(&mut rx).await;
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["data"]["userId"], 1);
        assert_eq!(joined["data"]["username"], "alice");

        assert!(hub.is_registered(id));
        assert_eq!(hub.connection_for(UserId(1)), Some(id));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_register_returns_once_addressable() {
        let hub = spawn_hub(seeded_store());
        let (handle, mut rx) = fake_connection(1, 16);
        let id = handle.id;

        hub.register(handle).await.unwrap();

        // No waiting on presence frames: the registry already holds it
        assert!(hub.is_registered(id));
        assert_eq!(
            hub.send_to_connection(id, Frame::from("{\"type\":\"direct\"}")).await,
            Ok(())
        );
        next_of_type(&mut rx, "direct").await;
    }

    #[tokio::test]
    async fn test_register_fails_when_hub_gone() {
        let (hub, server) = Hub::new(seeded_store());
        drop(server);

        let (handle, _rx) = fake_connection(1, 16);
        assert!(matches!(hub.register(handle).await, Err(AppError::HubClosed)));
    }

    #[tokio::test]
    async fn test_one_online_users_per_transition() {
        let hub = spawn_hub(seeded_store());
        let (_a, mut a_rx) = register(&hub, 1).await;

        let (b, _b_rx) = register(&hub, 2).await;
        hub.unregister(b).await.unwrap();

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(next_frame(&mut a_rx).await);
        }
        assert_eq!(
            types_of(&frames),
            vec!["online_users", "user_joined", "online_users", "user_left"]
        );
        assert_eq!(online_ids(&frames[0]), vec![1, 2]);
        assert_eq!(online_ids(&frames[2]), vec![1]);
        assert_eq!(frames[3]["data"]["userId"], 2);
        assert_quiet(&mut a_rx).await;
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let store = seeded_store();
        let hub = spawn_hub(store.clone());
        let (a, mut a_rx) = register(&hub, 1).await;

        hub.unregister(ConnectionId::new()).await.unwrap();
        assert_quiet(&mut a_rx).await;

        hub.unregister(a).await.unwrap();
        hub.unregister(a).await.unwrap();

        // Queue closes after the single unregister; nothing else was sent
        assert!(tokio::time::timeout(std::time::Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .is_none());
        assert_eq!(hub.connection_count(), 0);

        let online = store.list_online_users().await.unwrap();
        assert!(online.is_empty());
    }

    #[tokio::test]
    async fn test_second_registration_supersedes() {
        let hub = spawn_hub(seeded_store());
        let (first, mut first_rx) = register(&hub, 1).await;
        let (second, _second_rx) = register(&hub, 1).await;

        assert_eq!(hub.connection_for(UserId(1)), Some(second));
        assert!(hub.is_registered(first));
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(hub.online_user_count(), 1);

        // Re-registering the same user is not a new arrival
        let frame = next_frame(&mut first_rx).await;
        assert_eq!(frame["type"], "online_users");
        assert_eq!(online_ids(&frame), vec![1]);
        assert_quiet(&mut first_rx).await;

        // The old connection leaving keeps the user online
        hub.unregister(first).await.unwrap();
        drain(&mut first_rx).await;
        assert_eq!(hub.connection_for(UserId(1)), Some(second));
        assert_eq!(hub.online_user_count(), 1);
    }

    #[tokio::test]
    async fn test_superseded_departure_keeps_presence() {
        let store = seeded_store();
        let hub = spawn_hub(store.clone());
        let (first, _first_rx) = register(&hub, 1).await;
        let (_second, _second_rx) = register(&hub, 1).await;
        let (_watcher, mut watcher_rx) = register(&hub, 2).await;

        hub.unregister(first).await.unwrap();

        let frame = next_frame(&mut watcher_rx).await;
        assert_eq!(frame["type"], "online_users");
        assert_eq!(online_ids(&frame), vec![1, 2]);
        // No user_left: alice is still connected
        assert_quiet(&mut watcher_rx).await;
        assert_eq!(store.list_online_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_evicted_on_broadcast() {
        let store = seeded_store();
        let hub = spawn_hub(store.clone());

        // Capacity 2 is filled by its own online_users + user_joined
        let (slow, mut slow_rx) = fake_connection(1, 2);
        let slow_id = slow.id;
        hub.register(slow).await.unwrap();

        let (fast, mut fast_rx) = fake_connection(2, 64);
        hub.register(fast).await.unwrap();

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(next_frame(&mut fast_rx).await);
        }
        assert_eq!(
            types_of(&frames),
            vec!["online_users", "user_joined", "online_users", "user_left"]
        );
        assert_eq!(online_ids(&frames[2]), vec![2]);
        assert_eq!(frames[3]["data"]["userId"], 1);

        assert!(!hub.is_registered(slow_id));
        assert_eq!(hub.connection_for(UserId(1)), None);
        let online = store.list_online_users().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].user_id, UserId(2));

        // The evicted queue is closed after what it already held
        next_frame(&mut slow_rx).await;
        next_frame(&mut slow_rx).await;
        assert!(slow_rx.recv().await.is_none());

        // Later broadcasts still exclude it
        hub.broadcast(Frame::from("{\"type\":\"ping\"}")).await.unwrap();
        assert_eq!(next_frame(&mut fast_rx).await["type"], "ping");
    }

    #[tokio::test]
    async fn test_send_to_user_full_queue_evicts() {
        let hub = spawn_hub(seeded_store());
        let (_watcher, mut watcher_rx) = register(&hub, 2).await;

        let (slow, _slow_rx) = fake_connection(1, 3);
        let slow_id = slow.id;
        hub.register(slow).await.unwrap();
        drain(&mut watcher_rx).await;

        // Capacity 3: online_users + user_joined + one more
        assert_eq!(hub.send_to_user(UserId(1), Frame::from("{}")).await, Ok(()));
        assert_eq!(
            hub.send_to_user(UserId(1), Frame::from("{}")).await,
            Err(DeliveryError::QueueFull)
        );

        let left = next_of_type(&mut watcher_rx, "user_left").await;
        assert_eq!(left["data"]["userId"], 1);
        assert!(!hub.is_registered(slow_id));
    }

    #[tokio::test]
    async fn test_send_to_offline_user() {
        let hub = spawn_hub(seeded_store());
        assert_eq!(
            hub.send_to_user(UserId(3), Frame::from("{}")).await,
            Err(DeliveryError::NotConnected)
        );
        assert_eq!(
            hub.send_to_connection(ConnectionId::new(), Frame::from("{}")).await,
            Err(DeliveryError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = spawn_hub(seeded_store());
        let (_a, mut a_rx) = register(&hub, 1).await;
        let (_b, mut b_rx) = register(&hub, 2).await;
        drain(&mut a_rx).await;

        hub.broadcast(Frame::from("{\"type\":\"new_post\"}")).await.unwrap();

        assert_eq!(next_frame(&mut a_rx).await["type"], "new_post");
        assert_eq!(next_frame(&mut b_rx).await["type"], "new_post");
    }

    #[tokio::test]
    async fn test_registry_consistent_under_churn() {
        let hub = spawn_hub(seeded_store());
        let mut live = Vec::new();

        for round in 0..6 {
            let user = round % 3 + 1;
            let (id, rx) = register(&hub, user).await;
            live.push((id, rx));
            assert!(hub.registry.read().is_consistent());

            if round % 2 == 1 {
                let (id, _rx) = live.remove(0);
                hub.unregister(id).await.unwrap();
            }
        }
        for (id, _rx) in live.drain(..) {
            hub.unregister(id).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let registry = hub.registry.read();
        assert!(registry.is_consistent());
        assert!(registry.is_empty());
    }
}
