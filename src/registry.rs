//! Connection registry
//!
//! The live-connection set and the user → current-connection map, always
//! updated together. Only the hub control loop mutates it; everything
//! else reads through the hub's lock.

use std::collections::HashMap;

use crate::connection::ConnectionHandle;
use crate::types::{ConnectionId, Frame, UserId};

/// A connection that left the registry
#[derive(Debug)]
pub struct Departure {
    /// The removed entry
    pub handle: ConnectionHandle,
    /// True if it was the user's current connection, so the user is now offline
    pub user_offline: bool,
}

/// Live connections indexed by handle and by user
///
/// Invariant: every value in `users` is a key of `connections`, and points
/// at a connection owned by that user.
#[derive(Debug, Default)]
pub struct Registry {
    /// All live connections: ConnectionId -> handle
    connections: HashMap<ConnectionId, ConnectionHandle>,
    /// Current connection per user: UserId -> ConnectionId
    users: HashMap<UserId, ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and make it the user's current one
    ///
    /// Returns the superseded connection ID, if the user already had one.
    /// The superseded connection stays in the live set until it departs.
    pub fn insert(&mut self, handle: ConnectionHandle) -> Option<ConnectionId> {
        let id = handle.id;
        let user_id = handle.user_id;
        self.connections.insert(id, handle);
        self.users.insert(user_id, id).filter(|prev| *prev != id)
    }

    /// Remove a connection
    ///
    /// Returns `None` if it was not registered. The user mapping is only
    /// cleared if it still points at this connection.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Departure> {
        let handle = self.connections.remove(&id)?;
        let user_offline = self.users.get(&handle.user_id) == Some(&id);
        if user_offline {
            self.users.remove(&handle.user_id);
        }
        Some(Departure {
            handle,
            user_offline,
        })
    }

    /// Look up a connection by handle
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    /// Look up a user's current connection
    pub fn for_user(&self, user_id: UserId) -> Option<&ConnectionHandle> {
        self.users
            .get(&user_id)
            .and_then(|id| self.connections.get(id))
    }

    /// Check if a connection is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Check if a user has a current connection
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Number of live connections (superseded ones included)
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of users with a current connection
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Push a frame to every live connection
    ///
    /// Connections whose queue is full or closed are removed in the same
    /// pass and returned.
    pub fn deliver_all(&mut self, frame: &Frame) -> Vec<Departure> {
        let stalled: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| conn.try_deliver(frame.clone()).is_err())
            .map(|conn| conn.id)
            .collect();

        stalled.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Check that both mappings agree
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.users.iter().all(|(user_id, id)| {
            self.connections
                .get(id)
                .is_some_and(|conn| conn.user_id == *user_id)
        })
    }
}
