//! In-memory presence registry.
//!
//! The single source of truth for "is this user reachable right now".
//! One entry per live connection, holding the connection's event channel
//! and the group key the user currently presents.  Nothing here is ever
//! persisted; after a restart the registry starts empty and durable
//! online flags may be stale until clients reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use lanlink_shared::{GroupKey, UserId};

use crate::events::ServerEvent;

/// Handle for pushing events to one live connection.
pub type ConnectionHandle = mpsc::Sender<ServerEvent>;

#[derive(Debug, Clone)]
struct PresenceEntry {
    handle: ConnectionHandle,
    group: Option<GroupKey>,
}

/// Process-wide registry of live connections.  Cheap to clone; all clones
/// share the same map.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert (or overwrite) the entry for a freshly authenticated
    /// connection.  The new entry starts with no group key.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) {
        self.inner
            .write()
            .await
            .insert(user, PresenceEntry { handle, group: None });
    }

    /// Remove a user's entry entirely (on disconnect).
    pub async fn unregister(&self, user: UserId) {
        self.inner.write().await.remove(&user);
    }

    /// Update the group key an existing entry presents.  No-op when the
    /// user has no live connection.
    pub async fn set_group(&self, user: UserId, group: Option<GroupKey>) {
        if let Some(entry) = self.inner.write().await.get_mut(&user) {
            entry.group = group;
        }
    }

    /// Connection handle for a user, if one is live.
    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.inner.read().await.get(&user).map(|e| e.handle.clone())
    }

    /// The group key a user currently presents.
    pub async fn current_group(&self, user: UserId) -> Option<GroupKey> {
        self.inner.read().await.get(&user).and_then(|e| e.group.clone())
    }

    /// Snapshot of every user currently presenting the given group key.
    /// Derived by scanning; group sizes are bounded by one local network.
    pub async fn members_of(&self, key: &GroupKey) -> Vec<UserId> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.group.as_ref() == Some(key))
            .map(|(user, _)| *user)
            .collect()
    }

    /// Deliver an event to one user, fire-and-forget.  Returns `true` when
    /// the event was queued.  A closed handle means the connection died
    /// without cleanup; the entry is dropped as an implicit disconnect.
    pub async fn send_to(&self, user: UserId, event: ServerEvent) -> bool {
        let handle = match self.inner.read().await.get(&user) {
            Some(entry) => entry.handle.clone(),
            None => return false,
        };

        match handle.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(user = %user, "dropping event for slow connection");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(user = %user, "stale connection handle, removing presence entry");
                let mut inner = self.inner.write().await;
                if let Some(entry) = inner.get(&user) {
                    if entry.handle.same_channel(&handle) {
                        inner.remove(&user);
                    }
                }
                false
            }
        }
    }

    /// Deliver an event to a snapshot of the group's members taken at call
    /// time.  One failed target never aborts delivery to the rest.
    pub async fn broadcast(&self, key: &GroupKey, event: ServerEvent, exclude: Option<UserId>) {
        let targets = self.members_of(key).await;
        for user in targets {
            if Some(user) == exclude {
                continue;
            }
            self.send_to(user, event.clone()).await;
        }
    }

    /// Number of live connections (used by the health probe and tests).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
