//! Typed event payloads exchanged over a client connection.
//!
//! Every inbound frame is deserialized into a [`ClientEvent`] variant
//! before it touches any state; malformed payloads are rejected with an
//! error event rather than trusted at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lanlink_shared::{DeviceType, GroupKey, MessageType, UserId};
use lanlink_store::{Attachment, Group, ReadReceipt, StoredMessage, User};

// ---------------------------------------------------------------------------
// Inbound (client -> server)
// ---------------------------------------------------------------------------

/// Events a connected client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join the network group derived from the client's address (or an
    /// explicit subnet override, used for localhost testing).
    JoinNetwork {
        address: Option<String>,
        ssid: Option<String>,
        subnet: Option<GroupKey>,
    },

    /// Leave a network group.
    LeaveNetwork { subnet: GroupKey },

    /// Send a direct message.
    SendMessage {
        recipient_id: UserId,
        content: Option<String>,
        #[serde(default)]
        message_type: MessageType,
        attachment: Option<Attachment>,
    },

    /// Send a message to a network group.
    SendGroupMessage {
        subnet: GroupKey,
        content: Option<String>,
        #[serde(default)]
        message_type: MessageType,
        attachment: Option<Attachment>,
    },

    /// Direct typing indicator (pure relay, no persistence).
    Typing { recipient_id: UserId, is_typing: bool },

    /// Group typing indicator.
    TypingGroup { subnet: GroupKey, is_typing: bool },

    /// Record a read receipt for a message.
    MarkRead { message_id: Uuid },

    /// On-demand presence query for the caller's current group.
    GetNetworkUsers,
}

// ---------------------------------------------------------------------------
// Outbound (server -> client)
// ---------------------------------------------------------------------------

/// Events pushed to a connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to a join request.  `group` is absent on failure, with the
    /// reason in `error`.
    NetworkJoined {
        group: Option<GroupSummary>,
        members: Vec<MemberInfo>,
        error: Option<String>,
    },

    /// Group summary changed (member joined or left).
    GroupUpdate { group: GroupSummary },

    /// Current member list of the caller's group.  `subnet` is absent when
    /// the caller is not in any group.
    MembersUpdate {
        subnet: Option<GroupKey>,
        members: Vec<MemberInfo>,
    },

    /// A user joined the recipient's group.
    UserJoinedNetwork { user: MemberInfo, group: GroupSummary },

    /// A user left the recipient's group.
    UserLeftNetwork { user_id: UserId, username: String },

    /// Send confirmation, delivered back to the message's sender.
    MessageSent { message: MessageView },

    /// Incoming direct message.
    ReceiveMessage { message: MessageView },

    /// Incoming group message.
    ReceiveGroupMessage { message: MessageView },

    /// Read receipt, delivered to the original sender.
    MessageRead {
        message_id: Uuid,
        read_by: UserId,
        read_at: DateTime<Utc>,
    },

    /// Direct typing indicator.
    UserTyping {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },

    /// Group typing indicator.
    UserTypingGroup {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },

    /// Operation failed; generic message only, details stay in the logs.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Payload building blocks
// ---------------------------------------------------------------------------

/// Compact group description sent with group events.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub name: String,
    pub ssid: String,
    pub active_members: u32,
}

impl From<&Group> for GroupSummary {
    fn from(group: &Group) -> Self {
        Self {
            key: group.key.clone(),
            name: group.name.clone(),
            ssid: group.ssid.clone(),
            active_members: group.active_members,
        }
    }
}

/// A group member resolved to its display identity.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub status: Option<String>,
    pub is_online: bool,
    pub device_type: DeviceType,
    pub joined_at: DateTime<Utc>,
}

impl MemberInfo {
    pub fn from_user(user: &User, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            status: user.status.clone(),
            is_online: user.is_online,
            device_type: user.device_type,
            joined_at,
        }
    }
}

/// Minimal user reference attached to message views.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// A persisted message with its parties resolved to display identities.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageView {
    pub id: Uuid,
    pub sender: UserRef,
    pub recipient: Option<UserRef>,
    pub group_key: Option<GroupKey>,
    pub content: Option<String>,
    /// The sealed body travels with the view so history readers can decrypt
    /// without a second fetch.
    pub encrypted_content: Option<Vec<u8>>,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl MessageView {
    pub fn build(message: &StoredMessage, sender: &User, recipient: Option<&User>) -> Self {
        Self {
            id: message.id,
            sender: sender.into(),
            recipient: recipient.map(Into::into),
            group_key: message.group_key.clone(),
            content: message.content.clone(),
            encrypted_content: message.encrypted_content.clone(),
            message_type: message.message_type,
            attachment: message.attachment.clone(),
            read_by: message.read_by.clone(),
            created_at: message.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_parses_tagged_json() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"join-network","address":"192.168.1.4","ssid":"HomeNet","subnet":null}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            ClientEvent::JoinNetwork { address: Some(_), ssid: Some(_), subnet: None }
        ));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type":"drop-tables","payload":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type":"mark-read","message_id":42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_event_serializes_with_tag() {
        let json = serde_json::to_string(&ServerEvent::UserLeftNetwork {
            user_id: UserId::new(),
            username: "alice".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"user-left-network""#));
        assert!(json.contains(r#""username":"alice""#));
    }
}
