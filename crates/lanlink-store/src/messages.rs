//! Message store operations.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use lanlink_shared::{GroupKey, MessageType, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, ReadReceipt, StoredMessage};

impl Database {
    pub fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, group_key, content,
                                   encrypted_content, message_type, file_url, file_name,
                                   file_size, is_deleted, deleted_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.recipient_id.map(|r| r.to_string()),
                message.group_key.as_ref().map(|k| k.as_str().to_string()),
                message.content,
                message.encrypted_content,
                message.message_type.as_str(),
                message.attachment.as_ref().map(|a| a.url.clone()),
                message.attachment.as_ref().and_then(|a| a.name.clone()),
                message.attachment.as_ref().and_then(|a| a.size),
                message.is_deleted,
                message.deleted_at.map(|t| t.to_rfc3339()),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<StoredMessage> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, sender_id, recipient_id, group_key, content, encrypted_content,
                        message_type, file_url, file_name, file_size, is_deleted,
                        deleted_at, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        message.read_by = self.read_receipts(id)?;
        Ok(message)
    }

    /// Append a read receipt.  Idempotent: a second receipt from the same
    /// reader is ignored.  Returns `true` when a new receipt was recorded.
    pub fn append_read_receipt(
        &self,
        message_id: Uuid,
        reader: UserId,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             VALUES (?1, ?2, ?3)",
            params![
                message_id.to_string(),
                reader.to_string(),
                read_at.to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn read_receipts(&self, message_id: Uuid) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, read_at FROM message_reads
             WHERE message_id = ?1
             ORDER BY read_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let user_id: String = row.get(0)?;
            let read_at: String = row.get(1)?;
            Ok((user_id, read_at))
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            let (user_id, read_at) = row?;
            receipts.push(ReadReceipt {
                user_id: UserId::parse(&user_id)?,
                read_at: parse_ts(&read_at)?,
            });
        }
        Ok(receipts)
    }

    /// Direct-conversation history between two users, newest first.
    pub fn direct_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, group_key, content, encrypted_content,
                    message_type, file_url, file_name, file_size, is_deleted,
                    deleted_at, created_at
             FROM messages
             WHERE is_deleted = 0
               AND ((sender_id = ?1 AND recipient_id = ?2)
                 OR (sender_id = ?2 AND recipient_id = ?1))
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(
            params![a.to_string(), b.to_string(), limit, offset],
            row_to_message,
        )?;

        self.collect_with_receipts(rows)
    }

    /// Group-conversation history, newest first.
    pub fn group_history(
        &self,
        key: &GroupKey,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, recipient_id, group_key, content, encrypted_content,
                    message_type, file_url, file_name, file_size, is_deleted,
                    deleted_at, created_at
             FROM messages
             WHERE is_deleted = 0 AND group_key = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![key.as_str(), limit, offset], row_to_message)?;

        self.collect_with_receipts(rows)
    }

    /// Soft-delete a message.  Returns `true` if the row existed.
    pub fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_deleted = 1, deleted_at = ?2 WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    fn collect_with_receipts(
        &self,
        rows: impl Iterator<Item = rusqlite::Result<StoredMessage>>,
    ) -> Result<Vec<StoredMessage>> {
        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.read_by = self.read_receipts(message.id)?;
            messages.push(message);
        }
        Ok(messages)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: Option<String> = row.get(2)?;
    let group_key: Option<String> = row.get(3)?;
    let content: Option<String> = row.get(4)?;
    let encrypted_content: Option<Vec<u8>> = row.get(5)?;
    let message_type: String = row.get(6)?;
    let file_url: Option<String> = row.get(7)?;
    let file_name: Option<String> = row.get(8)?;
    let file_size: Option<i64> = row.get(9)?;
    let is_deleted: bool = row.get(10)?;
    let deleted_at: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let recipient_id = recipient_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let attachment = file_url.map(|url| Attachment {
        url,
        name: file_name,
        size: file_size,
    });

    Ok(StoredMessage {
        id,
        sender_id,
        recipient_id,
        group_key: group_key.map(GroupKey),
        content,
        encrypted_content,
        message_type: MessageType::from_str(&message_type),
        attachment,
        read_by: Vec::new(),
        is_deleted,
        deleted_at: deleted_at.as_deref().map(parse_col_ts).transpose()?,
        created_at: parse_col_ts(&created_at)?,
    })
}

fn parse_col_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_test_db, test_user};

    fn direct_message(sender: UserId, recipient: UserId, content: &str) -> StoredMessage {
        StoredMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: Some(recipient),
            group_key: None,
            content: Some(content.to_string()),
            encrypted_content: Some(vec![1, 2, 3]),
            message_type: MessageType::Text,
            attachment: None,
            read_by: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");

        let message = direct_message(alice.id, bob.id, "hello");
        db.insert_message(&message).unwrap();

        let loaded = db.get_message(message.id).unwrap();
        assert_eq!(loaded.content.as_deref(), Some("hello"));
        assert_eq!(loaded.recipient_id, Some(bob.id));
        assert!(loaded.read_by.is_empty());
    }

    #[test]
    fn read_receipt_is_idempotent() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");

        let message = direct_message(alice.id, bob.id, "hi");
        db.insert_message(&message).unwrap();

        assert!(db.append_read_receipt(message.id, bob.id, Utc::now()).unwrap());
        assert!(!db.append_read_receipt(message.id, bob.id, Utc::now()).unwrap());

        let loaded = db.get_message(message.id).unwrap();
        assert_eq!(loaded.read_by.len(), 1);
        assert_eq!(loaded.read_by[0].user_id, bob.id);
    }

    #[test]
    fn direct_history_covers_both_directions() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");
        let carol = test_user(&db, "carol");

        db.insert_message(&direct_message(alice.id, bob.id, "one")).unwrap();
        db.insert_message(&direct_message(bob.id, alice.id, "two")).unwrap();
        db.insert_message(&direct_message(alice.id, carol.id, "other")).unwrap();

        let history = db.direct_history(alice.id, bob.id, 50, 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn group_history_round_trip() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let key = GroupKey::from("192.168.1");

        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: alice.id,
            recipient_id: None,
            group_key: Some(key.clone()),
            content: Some("hello group".into()),
            encrypted_content: Some(vec![9, 9]),
            message_type: MessageType::Text,
            attachment: None,
            read_by: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };
        db.insert_message(&message).unwrap();

        let history = db.group_history(&key, 50, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].group_key, Some(key));
    }

    #[test]
    fn soft_deleted_messages_leave_history() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");

        let message = direct_message(alice.id, bob.id, "oops");
        db.insert_message(&message).unwrap();
        assert!(db.soft_delete_message(message.id, Utc::now()).unwrap());

        assert!(db.direct_history(alice.id, bob.id, 50, 0).unwrap().is_empty());
        // The row itself survives (soft delete).
        assert!(db.get_message(message.id).unwrap().is_deleted);
    }

    #[test]
    fn attachment_only_message_persists_without_content() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");

        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: alice.id,
            recipient_id: Some(bob.id),
            group_key: None,
            content: None,
            encrypted_content: None,
            message_type: MessageType::File,
            attachment: Some(Attachment {
                url: "/files/report.pdf".into(),
                name: Some("report.pdf".into()),
                size: Some(8192),
            }),
            read_by: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };
        db.insert_message(&message).unwrap();

        let loaded = db.get_message(message.id).unwrap();
        assert!(loaded.content.is_none());
        assert!(loaded.encrypted_content.is_none());
        assert_eq!(
            loaded.attachment.as_ref().map(|a| a.url.as_str()),
            Some("/files/report.pdf")
        );
    }
}
