//! Envelope codec
//!
//! Every message crossing a connection is a JSON object
//! `{"type": "<event>", "data": {...}}`. Both directions use Serde's
//! adjacently tagged enums, so an unknown type or a payload of the wrong
//! shape is rejected by the decoder instead of being half-read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Frame, UserId};

/// Client → Hub event
///
/// The only events a connection may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Send a private message to another user
    PrivateMessage(PrivateMessagePayload),
    /// Started typing in a conversation
    Typing(TypingPayload),
    /// Stopped typing in a conversation
    StopTyping(TypingPayload),
}

impl ClientEvent {
    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub recipient_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_with: UserId,
}

/// Hub → Client event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A private message was stored (delivered to recipient and sender)
    NewMessage(NewMessageEvent),
    /// Full online-user list after a membership change
    OnlineUsers(OnlineUsersEvent),
    /// A user came online
    UserJoined(UserPresenceEvent),
    /// A user went offline
    UserLeft(UserPresenceEvent),
    /// Counterpart is typing
    Typing(TypingEvent),
    /// Counterpart stopped typing
    StopTyping(StopTypingEvent),
    /// A post was created through the API
    NewPost(NewPostEvent),
    /// A comment was created through the API
    NewComment(NewCommentEvent),
}

impl ServerEvent {
    /// Serialize once for all recipients
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::OnlineUsers(_) => "online_users",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::StopTyping(_) => "stop_typing",
            ServerEvent::NewPost(_) => "new_post",
            ServerEvent::NewComment(_) => "new_comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub id: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    /// Sender's nickname
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUsersEvent {
    pub users: Vec<UserStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub id: UserId,
    pub nickname: String,
    pub avatar_color: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresenceEvent {
    pub user_id: UserId,
    pub username: String,
    pub avatar_color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: UserId,
    pub username: String,
    pub chat_with: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingEvent {
    pub user_id: UserId,
    pub chat_with: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPostEvent {
    pub id: i64,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub category_id: i64,
    pub category_name: String,
    pub nickname: String,
    pub avatar_color: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentEvent {
    pub id: i64,
    pub post_id: i64,
    pub user_id: UserId,
    pub content: String,
    pub nickname: String,
    pub avatar_color: String,
    pub timestamp: DateTime<Utc>,
}
