//! Collaborator interfaces
//!
//! The hub never talks to a database or checks credentials itself. It
//! consumes a persistence `Store` and a `SessionResolver`; `MemoryStore`
//! implements both for the binary and for tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::UserId;

/// Lifetime of a newly issued session
pub const SESSION_TTL_DAYS: i64 = 7;

/// Display data attached to outbound events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDisplay {
    pub nickname: String,
    pub avatar_color: String,
}

/// Presence as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar_color: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// A private message to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
}

/// A stored private message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A stored forum post, as handed over by the API layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: i64,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub category_id: i64,
    pub category_name: String,
    pub created_at: DateTime<Utc>,
}

/// A stored comment, as handed over by the API layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations the hub depends on
#[async_trait]
pub trait Store: Send + Sync {
    /// Flag the user online and refresh `last_seen`
    async fn mark_user_online(&self, user_id: UserId) -> Result<(), StoreError>;

    /// Flag the user offline and refresh `last_seen`
    async fn mark_user_offline(&self, user_id: UserId) -> Result<(), StoreError>;

    /// All users flagged online, ordered by nickname
    async fn list_online_users(&self) -> Result<Vec<PresenceRecord>, StoreError>;

    /// Durably store a private message, assigning its ID and timestamp
    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError>;

    /// Display data for a user
    ///
    /// # Errors
    ///
    /// - `NotFound` if the user does not exist
    async fn user_display(&self, user_id: UserId) -> Result<UserDisplay, StoreError>;
}

/// Maps a session token to a user
///
/// Synchronous because it is consulted inside the upgrade handshake,
/// before any protocol switch.
pub trait SessionResolver: Send + Sync {
    /// `Ok(None)` for unknown or expired tokens
    fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError>;
}

#[derive(Debug, Clone)]
struct UserRow {
    nickname: String,
    avatar_color: String,
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct SessionRow {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRow>,
    sessions: HashMap<String, SessionRow>,
    messages: Vec<MessageRecord>,
}

/// Seed file layout for `MemoryStore::load_seed`
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub sessions: Vec<SeedSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: UserId,
    pub nickname: String,
    pub avatar_color: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSession {
    pub token: String,
    pub user_id: UserId,
}

/// In-memory users, sessions and messages
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load users and sessions from a JSON seed file
    pub fn load_seed(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let seed: Seed =
            serde_json::from_str(&text).map_err(|e| StoreError::Invalid(e.to_string()))?;

        let store = Self::new();
        for user in &seed.users {
            store.add_user(user.id, &user.nickname, &user.avatar_color);
        }
        let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);
        for session in seed.sessions {
            store.insert_session(session.token, session.user_id, expires_at);
        }
        info!(
            "Seeded {} users and {} sessions from {}",
            seed.users.len(),
            store.tables.read().sessions.len(),
            path.display()
        );
        Ok(store)
    }

    /// Add or replace a user
    pub fn add_user(&self, user_id: UserId, nickname: &str, avatar_color: &str) {
        self.tables.write().users.insert(
            user_id,
            UserRow {
                nickname: nickname.to_string(),
                avatar_color: avatar_color.to_string(),
                is_online: false,
                last_seen: None,
            },
        );
    }

    /// Issue a new session token for a known user
    pub fn create_session(&self, user_id: UserId) -> Result<String, StoreError> {
        if !self.tables.read().users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        let token = Uuid::new_v4().to_string();
        self.insert_session(token.clone(), user_id, Utc::now() + Duration::days(SESSION_TTL_DAYS));
        Ok(token)
    }

    /// Insert a session with an explicit expiry
    pub fn insert_session(&self, token: String, user_id: UserId, expires_at: DateTime<Utc>) {
        self.tables
            .write()
            .sessions
            .insert(token, SessionRow { user_id, expires_at });
    }

    /// Revoke a session; unknown tokens are ignored
    pub fn revoke_session(&self, token: &str) {
        self.tables.write().sessions.remove(token);
    }

    /// All stored messages between two users, oldest first
    pub fn conversation(&self, a: UserId, b: UserId) -> Vec<MessageRecord> {
        self.tables
            .read()
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.recipient_id == b) || (m.sender_id == b && m.recipient_id == a)
            })
            .cloned()
            .collect()
    }

    /// Number of stored messages
    pub fn message_count(&self) -> usize {
        self.tables.read().messages.len()
    }

    fn set_online(&self, user_id: UserId, is_online: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let row = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        row.is_online = is_online;
        row.last_seen = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn mark_user_online(&self, user_id: UserId) -> Result<(), StoreError> {
        self.set_online(user_id, true)
    }

    async fn mark_user_offline(&self, user_id: UserId) -> Result<(), StoreError> {
        self.set_online(user_id, false)
    }

    async fn list_online_users(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        let tables = self.tables.read();
        let mut users: Vec<PresenceRecord> = tables
            .users
            .iter()
            .filter(|(_, row)| row.is_online)
            .map(|(id, row)| PresenceRecord {
                user_id: *id,
                nickname: row.nickname.clone(),
                avatar_color: row.avatar_color.clone(),
                is_online: row.is_online,
                last_seen: row.last_seen,
            })
            .collect();
        users.sort_by(|a, b| a.nickname.cmp(&b.nickname).then(a.user_id.cmp(&b.user_id)));
        Ok(users)
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let mut tables = self.tables.write();
        for id in [message.sender_id, message.recipient_id] {
            if !tables.users.contains_key(&id) {
                return Err(StoreError::Invalid(format!("unknown user {}", id)));
            }
        }
        let record = MessageRecord {
            id: tables.messages.len() as i64 + 1,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content,
            created_at: Utc::now(),
        };
        tables.messages.push(record.clone());
        Ok(record)
    }

    async fn user_display(&self, user_id: UserId) -> Result<UserDisplay, StoreError> {
        self.tables
            .read()
            .users
            .get(&user_id)
            .map(|row| UserDisplay {
                nickname: row.nickname.clone(),
                avatar_color: row.avatar_color.clone(),
            })
            .ok_or(StoreError::NotFound)
    }
}

impl SessionResolver for MemoryStore {
    fn resolve(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self
            .tables
            .read()
            .sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id))
    }
}
