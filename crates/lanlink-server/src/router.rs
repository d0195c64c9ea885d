//! Message routing: encrypt, persist, then deliver to live connections.
//!
//! Persistence always happens; live delivery is best-effort against the
//! presence registry.  An offline recipient is not an error -- the
//! message waits in the store for the history read path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use lanlink_shared::crypto::{direct_key, encrypt_content, group_conversation_key};
use lanlink_shared::{GroupKey, MessageType, UserId};
use lanlink_store::{Attachment, Database, StoreError, StoredMessage};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{MessageView, ServerEvent};
use crate::presence::PresenceRegistry;

pub struct MessageRouter {
    db: Arc<Mutex<Database>>,
    presence: PresenceRegistry,
    config: Arc<ServerConfig>,
}

impl MessageRouter {
    pub fn new(
        db: Arc<Mutex<Database>>,
        presence: PresenceRegistry,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            db,
            presence,
            config,
        }
    }

    /// Send a direct message.  Delivers to the recipient if they are live
    /// and always confirms back to the sender's own connection.
    pub async fn send_direct(
        &self,
        sender: UserId,
        recipient: UserId,
        content: Option<String>,
        message_type: MessageType,
        attachment: Option<Attachment>,
    ) -> Result<MessageView, ServerError> {
        if content.is_none() && attachment.is_none() {
            return Err(ServerError::BadRequest("message has no content".into()));
        }

        let key = direct_key(sender, recipient, &self.config.message_secret);
        let encrypted_content = encrypt_content(content.as_deref(), &key)?;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: Some(recipient),
            group_key: None,
            content,
            encrypted_content,
            message_type,
            attachment,
            read_by: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };

        let view = {
            let db = self.db.lock().await;
            db.insert_message(&message)?;

            let sender_user = db.get_user(sender)?;
            let recipient_user = db.get_user(recipient)?;
            MessageView::build(&message, &sender_user, Some(&recipient_user))
        };

        let delivered = self
            .presence
            .send_to(
                recipient,
                ServerEvent::ReceiveMessage {
                    message: view.clone(),
                },
            )
            .await;
        if !delivered {
            debug!(message = %view.id, recipient = %recipient, "recipient offline, stored only");
        }

        self.presence
            .send_to(
                sender,
                ServerEvent::MessageSent {
                    message: view.clone(),
                },
            )
            .await;

        Ok(view)
    }

    /// Send a group message.  Delivery goes to every connection currently
    /// presenting the group key -- presence is the delivery authority,
    /// the durable membership is only the record.
    pub async fn send_group(
        &self,
        sender: UserId,
        group: GroupKey,
        content: Option<String>,
        message_type: MessageType,
        attachment: Option<Attachment>,
    ) -> Result<MessageView, ServerError> {
        if content.is_none() && attachment.is_none() {
            return Err(ServerError::BadRequest("message has no content".into()));
        }

        let key = group_conversation_key(&group, &self.config.message_secret);
        let encrypted_content = encrypt_content(content.as_deref(), &key)?;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: sender,
            recipient_id: None,
            group_key: Some(group.clone()),
            content,
            encrypted_content,
            message_type,
            attachment,
            read_by: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        };

        let view = {
            let db = self.db.lock().await;
            db.insert_message(&message)?;

            let sender_user = db.get_user(sender)?;
            MessageView::build(&message, &sender_user, None)
        };

        self.presence
            .broadcast(
                &group,
                ServerEvent::ReceiveGroupMessage {
                    message: view.clone(),
                },
                None,
            )
            .await;

        Ok(view)
    }

    /// Record a read receipt.  Idempotent: a repeat read changes nothing
    /// and notifies nobody.  A missing message is silently ignored.
    pub async fn mark_read(&self, message_id: Uuid, reader: UserId) -> Result<(), ServerError> {
        let read_at = Utc::now();

        let sender = {
            let db = self.db.lock().await;
            let message = match db.get_message(message_id) {
                Ok(message) => message,
                Err(StoreError::NotFound) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            if !db.append_read_receipt(message_id, reader, read_at)? {
                return Ok(());
            }
            message.sender_id
        };

        self.presence
            .send_to(
                sender,
                ServerEvent::MessageRead {
                    message_id,
                    read_by: reader,
                    read_at,
                },
            )
            .await;

        Ok(())
    }

    /// Relay a direct typing indicator.  Pure relay: nothing persisted,
    /// delivered only if the target is currently present.
    pub async fn relay_typing(
        &self,
        from: UserId,
        from_username: &str,
        recipient: UserId,
        is_typing: bool,
    ) {
        self.presence
            .send_to(
                recipient,
                ServerEvent::UserTyping {
                    user_id: from,
                    username: from_username.to_string(),
                    is_typing,
                },
            )
            .await;
    }

    /// Relay a group typing indicator to everyone else on the key.
    pub async fn relay_typing_group(
        &self,
        from: UserId,
        from_username: &str,
        group: &GroupKey,
        is_typing: bool,
    ) {
        self.presence
            .broadcast(
                group,
                ServerEvent::UserTypingGroup {
                    user_id: from,
                    username: from_username.to_string(),
                    is_typing,
                },
                Some(from),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{register_presence, test_state, TestState};
    use lanlink_shared::crypto::decrypt_content;

    #[tokio::test]
    async fn direct_message_reaches_live_recipient_and_sender() {
        let TestState {
            router,
            presence,
            alice,
            bob,
            ..
        } = test_state().await;
        let mut rx_alice = register_presence(&presence, alice).await;
        let mut rx_bob = register_presence(&presence, bob).await;

        let view = router
            .send_direct(alice, bob, Some("hello".into()), MessageType::Text, None)
            .await
            .unwrap();
        assert_eq!(view.sender.username, "alice");
        assert_eq!(view.recipient.as_ref().unwrap().username, "bob");

        match rx_bob.try_recv().unwrap() {
            ServerEvent::ReceiveMessage { message } => assert_eq!(message.id, view.id),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx_alice.try_recv().unwrap() {
            ServerEvent::MessageSent { message } => assert_eq!(message.id, view.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_recipient_message_is_stored_not_delivered() {
        let TestState {
            router,
            db,
            alice,
            bob,
            ..
        } = test_state().await;

        let view = router
            .send_direct(alice, bob, Some("see you".into()), MessageType::Text, None)
            .await
            .unwrap();

        // Durably stored and later retrievable through the history path.
        let history = db.lock().await.direct_history(bob, alice, 50, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, view.id);
    }

    #[tokio::test]
    async fn group_message_fans_out_with_one_persisted_id() {
        let TestState {
            router,
            coordinator,
            presence,
            db,
            alice,
            bob,
            ..
        } = test_state().await;
        let mut rx_alice = register_presence(&presence, alice).await;
        let mut rx_bob = register_presence(&presence, bob).await;

        let key = GroupKey::from("192.168.1");
        coordinator
            .join(alice, Some("192.168.1.10"), None, None)
            .await
            .unwrap();
        coordinator
            .join(bob, Some("192.168.1.11"), None, None)
            .await
            .unwrap();
        while rx_alice.try_recv().is_ok() {}
        while rx_bob.try_recv().is_ok() {}

        let view = router
            .send_group(alice, key.clone(), Some("hello".into()), MessageType::Text, None)
            .await
            .unwrap();

        for rx in [&mut rx_alice, &mut rx_bob] {
            match rx.try_recv().unwrap() {
                ServerEvent::ReceiveGroupMessage { message } => assert_eq!(message.id, view.id),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        // Ciphertext is non-empty and derived from the group key.
        let stored = db.lock().await.get_message(view.id).unwrap();
        let sealed = stored.encrypted_content.expect("encrypted content");
        assert!(!sealed.is_empty());
        let conv_key =
            group_conversation_key(&key, &ServerConfig::default().message_secret);
        assert_eq!(decrypt_content(&sealed, &conv_key).unwrap(), "hello");
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let TestState {
            router, alice, bob, ..
        } = test_state().await;
        let err = router
            .send_direct(alice, bob, None, MessageType::Text, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn attachment_only_message_has_no_ciphertext() {
        let TestState {
            router, alice, bob, ..
        } = test_state().await;
        let view = router
            .send_direct(
                alice,
                bob,
                None,
                MessageType::File,
                Some(Attachment {
                    url: "/files/photo.png".into(),
                    name: Some("photo.png".into()),
                    size: Some(1024),
                }),
            )
            .await
            .unwrap();
        assert!(view.content.is_none());
        assert!(view.encrypted_content.is_none());
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_with_one_notification() {
        let TestState {
            router,
            presence,
            alice,
            bob,
            ..
        } = test_state().await;

        let view = router
            .send_direct(alice, bob, Some("read me".into()), MessageType::Text, None)
            .await
            .unwrap();

        let mut rx_alice = register_presence(&presence, alice).await;

        router.mark_read(view.id, bob).await.unwrap();
        router.mark_read(view.id, bob).await.unwrap();

        match rx_alice.try_recv().unwrap() {
            ServerEvent::MessageRead {
                message_id,
                read_by,
                ..
            } => {
                assert_eq!(message_id, view.id);
                assert_eq!(read_by, bob);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // Exactly one notification.
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_read_of_unknown_message_is_noop() {
        let TestState { router, bob, .. } = test_state().await;
        router.mark_read(Uuid::new_v4(), bob).await.unwrap();
    }

    #[tokio::test]
    async fn typing_relay_skips_offline_target_silently() {
        let TestState {
            router, alice, bob, ..
        } = test_state().await;
        router.relay_typing(alice, "alice", bob, true).await;
    }

    #[tokio::test]
    async fn group_typing_excludes_the_typist() {
        let TestState {
            router,
            presence,
            alice,
            bob,
            ..
        } = test_state().await;
        let mut rx_alice = register_presence(&presence, alice).await;
        let mut rx_bob = register_presence(&presence, bob).await;

        let key = GroupKey::from("10.0.0");
        presence.set_group(alice, Some(key.clone())).await;
        presence.set_group(bob, Some(key.clone())).await;

        router.relay_typing_group(alice, "alice", &key, true).await;

        assert!(rx_alice.try_recv().is_err());
        assert!(matches!(
            rx_bob.try_recv(),
            Ok(ServerEvent::UserTypingGroup { is_typing: true, .. })
        ));
    }
}
