//! Connection handle
//!
//! The hub-facing side of one live connection: who it belongs to and the
//! sending half of its bounded outbound queue. The pumps that own the
//! transport live in `handler`.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;
use crate::types::{ConnectionId, Frame, UserId};

/// Identity of the connection an inbound event arrived on
///
/// Carries no queue, so holding one never keeps a connection's outbound
/// loop alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// Registry entry for a live connection
///
/// Cloning shares the same queue. The queue closes once every clone is
/// dropped, which is how the hub ends the connection's outbound loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique handle for this connection
    pub id: ConnectionId,
    /// Authenticated owner
    pub user_id: UserId,
    /// Hub → Connection frame queue
    sender: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle around the sending half of an outbound queue
    pub fn new(id: ConnectionId, user_id: UserId, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            user_id,
            sender,
        }
    }

    /// Identity without the queue
    pub fn session(&self) -> Session {
        Session {
            connection_id: self.id,
            user_id: self.user_id,
        }
    }

    /// Enqueue a frame without waiting
    ///
    /// A full queue is reported rather than awaited; the caller decides
    /// whether to evict.
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
