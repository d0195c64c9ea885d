//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the
//! event layer for live delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lanlink_shared::{DeviceType, GroupKey, MessageType, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.  Registration itself happens outside this engine;
/// the directory only mutates network and liveness fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    /// Short free-form status line shown next to the user.
    pub status: Option<String>,
    pub device_type: DeviceType,
    /// Best-effort durable online flag; presence is the live authority.
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub current_network: Option<CurrentNetwork>,
    pub created_at: DateTime<Utc>,
}

/// The network a user is currently connected through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentNetwork {
    pub subnet: GroupKey,
    pub ssid: String,
    pub address: String,
    pub last_connected: DateTime<Utc>,
}

/// One entry of a user's bounded network history.  At most one entry per
/// user has `disconnected_at` absent (the currently open one).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkHistoryEntry {
    pub subnet: GroupKey,
    pub ssid: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A local-network group, keyed by its subnet string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    /// Unique key: the normalized subnet.
    pub key: GroupKey,
    pub name: String,
    pub ssid: String,
    /// Members are never removed, only deactivated.
    pub members: Vec<GroupMember>,
    /// Always equals the count of members with `is_active`.
    pub active_members: u32,
    pub last_activity: DateTime<Utc>,
    /// False iff `active_members` is 0.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted chat message.  Exactly one of `recipient_id` (direct) or
/// `group_key` (group message) is set, enforced by a schema CHECK.
///
/// The record carries both the plaintext and the sealed form of the body;
/// the routing path writes both and never decrypts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender_id: UserId,
    pub recipient_id: Option<UserId>,
    pub group_key: Option<GroupKey>,
    /// Plaintext body.  Absent only when an attachment is present.
    pub content: Option<String>,
    /// Sealed body (nonce || ciphertext).  Absent iff `content` is absent.
    pub encrypted_content: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Reference to an uploaded file; upload handling lives outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}
