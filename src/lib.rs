//! Real-time Forum Hub Library
//!
//! The live half of a forum: tracks which authenticated users are
//! connected over WebSocket, turns their inbound events into deliveries,
//! and fans forum activity out to everyone online.
//!
//! # Features
//! - Session-authenticated WebSocket upgrade
//! - Online-user presence pushed on every connect/disconnect
//! - Private messages with sender confirmation
//! - Typing indicators
//! - Live new-post and new-comment broadcast
//! - Heartbeat and dead-connection detection
//! - Bounded, non-blocking delivery with slow-client eviction
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `HubServer` is the single control loop and sole writer of the registry
//! - `Hub` is the cloneable handle; addressed sends read the registry under a lock
//! - Each connection runs a read task and a write task in `handler`
//! - Persistence and sessions are collaborators behind the `Store` and
//!   `SessionResolver` traits
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use forum_hub::{handle_connection, Config, Hub, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(Config::default());
//!     let store = Arc::new(MemoryStore::new());
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!
//!     let (hub, server) = Hub::new(store.clone());
//!     tokio::spawn(server.run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let hub = hub.clone();
//!         tokio::spawn(handle_connection(stream, hub, store.clone(), config.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod hub;
pub mod message;
pub mod presence;
pub mod registry;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use crate::config::{Config, ConnectionConfig};
pub use connection::{ConnectionHandle, Session};
pub use error::{AppError, ConfigError, DeliveryError, StoreError};
pub use events::{publish_new_comment, publish_new_post};
pub use handler::handle_connection;
pub use hub::{Hub, HubCommand, HubServer};
pub use message::{ClientEvent, ServerEvent};
pub use registry::Registry;
pub use store::{
    CommentRecord, MemoryStore, PostRecord, PresenceRecord, SessionResolver, Store, UserDisplay,
};
pub use types::{ConnectionId, Frame, UserId};
