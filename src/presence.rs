//! Presence tracker
//!
//! Derives the `online_users` list after each membership change. The
//! registry decides who is online; the store contributes display data
//! and `last_seen`.

use crate::message::{OnlineUsersEvent, UserPresenceEvent, UserStatus};
use crate::registry::Registry;
use crate::store::{PresenceRecord, UserDisplay};
use crate::types::UserId;

/// Build the online-user list from stored presence
///
/// Records flagged online in the store but without a live registration
/// are left out.
pub fn online_users(records: Vec<PresenceRecord>, registry: &Registry) -> OnlineUsersEvent {
    let users = records
        .into_iter()
        .filter(|record| registry.is_online(record.user_id))
        .map(|record| UserStatus {
            id: record.user_id,
            nickname: record.nickname,
            avatar_color: record.avatar_color,
            is_online: true,
            last_seen: record.last_seen,
        })
        .collect();
    OnlineUsersEvent { users }
}

/// Payload for `user_joined` / `user_left`
pub fn user_presence(user_id: UserId, display: UserDisplay) -> UserPresenceEvent {
    UserPresenceEvent {
        user_id,
        username: display.nickname,
        avatar_color: display.avatar_color,
    }
}
