//! Error types for the hub
//!
//! Defines application-level errors, delivery errors and collaborator errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Transport errors are fatal to one connection. Everything else is
/// scoped to the event that produced it.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal for the connection)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A transport write did not complete within the write deadline
    #[error("Write timed out")]
    WriteTimeout,

    /// Upgrade refused because the session did not resolve to a user
    #[error("Unauthorized")]
    Unauthorized,

    /// The hub control loop is no longer accepting commands
    #[error("Hub closed")]
    HubClosed,

    /// Inbound event failed validation
    #[error("Invalid event: {0}")]
    InvalidEvent(&'static str),

    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outbound delivery errors
///
/// Returned by the non-blocking enqueue onto a connection's queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No live connection for the addressed user or handle
    #[error("Not connected")]
    NotConnected,

    /// The outbound queue is at capacity
    #[error("Outbound queue full")]
    QueueFull,

    /// The receiving end of the queue has been dropped
    #[error("Channel closed")]
    Closed,
}

/// Persistence / session collaborator errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed record does not exist
    #[error("Not found")]
    NotFound,

    /// The backing store could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The record was rejected by the store
    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment could not be read or deserialized
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A value parsed but is out of range
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
