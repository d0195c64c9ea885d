//! Group coordination: join/leave orchestration and the stale-group reaper.
//!
//! All read-modify-write over one group record is serialized by a per-key
//! async mutex, so two racing joins to the same subnet cannot lose a
//! member addition or miscompute the active count.  The UNIQUE constraint
//! on the group key closes the first-join race at the storage layer as
//! well.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lanlink_shared::constants::UNKNOWN_SSID;
use lanlink_shared::network::{generate_group_name, subnet_for_addr};
use lanlink_shared::{GroupKey, UserId};
use lanlink_store::{CurrentNetwork, Database, Group, GroupMember, StoreError};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::{GroupSummary, MemberInfo, ServerEvent};
use crate::presence::PresenceRegistry;

/// A group together with its active members resolved to display
/// identities, as pushed to clients.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group: GroupSummary,
    pub members: Vec<MemberInfo>,
}

pub struct GroupCoordinator {
    db: Arc<Mutex<Database>>,
    presence: PresenceRegistry,
    config: Arc<ServerConfig>,
    /// Per-key serialization of group read-modify-write.  Lock entries are
    /// created on demand and never removed; the key space is bounded by
    /// the number of distinct subnets seen.
    key_locks: Mutex<HashMap<GroupKey, Arc<Mutex<()>>>>,
}

impl GroupCoordinator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        presence: PresenceRegistry,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            db,
            presence,
            config,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &GroupKey) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Join the group for the client's network.
    ///
    /// An explicit key overrides address resolution (localhost testing).
    /// Durable state is updated first, the presence registry second, so a
    /// store failure leaves the durable record consistent and skips only
    /// the presence fan-out.
    pub async fn join(
        &self,
        user: UserId,
        address: Option<&str>,
        ssid: Option<&str>,
        explicit_key: Option<GroupKey>,
    ) -> Result<GroupSnapshot, ServerError> {
        let key = explicit_key
            .or_else(|| {
                address.and_then(|addr| subnet_for_addr(addr, self.config.allow_loopback))
            })
            .ok_or(ServerError::InvalidNetwork)?;

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        {
            let mut db = self.db.lock().await;

            let existing = db.find_group(&key)?;
            if existing.is_none() {
                let group = Group {
                    key: key.clone(),
                    name: generate_group_name(&key, ssid, &self.config.group_name_patterns),
                    ssid: ssid.unwrap_or(UNKNOWN_SSID).to_string(),
                    members: vec![GroupMember {
                        user_id: user,
                        joined_at: now,
                        is_active: true,
                    }],
                    active_members: 1,
                    last_activity: now,
                    is_active: true,
                    created_at: now,
                };
                if db.create_group(&group)? {
                    info!(group = %key, user = %user, "created network group");
                } else {
                    // Lost a cross-process creation race; continue as a
                    // plain member upsert.
                    db.upsert_member(&key, user, now)?;
                    db.refresh_member_counts(&key)?;
                    db.touch_group_activity(&key, now)?;
                }
            } else {
                db.upsert_member(&key, user, now)?;
                db.refresh_member_counts(&key)?;
                db.touch_group_activity(&key, now)?;
            }

            db.set_current_network(
                user,
                &CurrentNetwork {
                    subnet: key.clone(),
                    ssid: ssid.unwrap_or(UNKNOWN_SSID).to_string(),
                    address: address.unwrap_or_default().to_string(),
                    last_connected: now,
                },
            )?;
        }

        self.presence.set_group(user, Some(key.clone())).await;

        let snapshot = self
            .snapshot(&key)
            .await?
            .ok_or_else(|| ServerError::Internal("group vanished during join".into()))?;

        info!(
            group = %key,
            user = %user,
            active_members = snapshot.group.active_members,
            "user joined network group"
        );

        // Fresh state to everyone on the key, plus a join notice to the
        // members that were already there.
        self.broadcast_state(&snapshot).await;
        if let Some(joined) = snapshot.members.iter().find(|m| m.id == user) {
            self.presence
                .broadcast(
                    &key,
                    ServerEvent::UserJoinedNetwork {
                        user: joined.clone(),
                        group: snapshot.group.clone(),
                    },
                    Some(user),
                )
                .await;
        }

        Ok(snapshot)
    }

    /// Leave a group, best-effort.  A missing group is a no-op: the reaper
    /// may have deleted it while the client was still attached.
    pub async fn leave(&self, user: UserId, key: &GroupKey) -> Result<(), ServerError> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let username;
        let group_existed;
        {
            let db = self.db.lock().await;

            username = match db.get_user(user) {
                Ok(u) => u.username,
                Err(StoreError::NotFound) => user.to_string(),
                Err(e) => return Err(e.into()),
            };

            group_existed = db.find_group(key)?.is_some();
            if group_existed {
                db.deactivate_member(key, user)?;
                let remaining = db.refresh_member_counts(key)?;
                debug!(group = %key, user = %user, remaining, "member left network group");
            }

            db.clear_current_network(user)?;
            db.close_open_history_entry(user, key, now)?;
        }

        self.presence.set_group(user, None).await;

        if group_existed {
            if let Some(snapshot) = self.snapshot(key).await? {
                self.broadcast_state(&snapshot).await;
            }
            self.presence
                .broadcast(
                    key,
                    ServerEvent::UserLeftNetwork {
                        user_id: user,
                        username,
                    },
                    Some(user),
                )
                .await;
        }

        Ok(())
    }

    /// Populated snapshot of a group's active members.
    pub async fn snapshot(&self, key: &GroupKey) -> Result<Option<GroupSnapshot>, ServerError> {
        let db = self.db.lock().await;
        let Some(group) = db.find_group(key)? else {
            return Ok(None);
        };

        let mut members = Vec::new();
        for member in group.members.iter().filter(|m| m.is_active) {
            match db.get_user(member.user_id) {
                Ok(user) => members.push(MemberInfo::from_user(&user, member.joined_at)),
                // A member row without a user record is stale directory
                // data; skip it rather than failing the whole snapshot.
                Err(StoreError::NotFound) => {
                    warn!(group = %key, user = %member.user_id, "member without user record")
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(GroupSnapshot {
            group: GroupSummary::from(&group),
            members,
        }))
    }

    async fn broadcast_state(&self, snapshot: &GroupSnapshot) {
        let key = snapshot.group.key.clone();
        self.presence
            .broadcast(
                &key,
                ServerEvent::GroupUpdate {
                    group: snapshot.group.clone(),
                },
                None,
            )
            .await;
        self.presence
            .broadcast(
                &key,
                ServerEvent::MembersUpdate {
                    subnet: Some(key.clone()),
                    members: snapshot.members.clone(),
                },
                None,
            )
            .await;
    }

    /// Delete every group that has been inactive for longer than the
    /// retention window.  No broadcast: nobody is listening on a dead key.
    pub async fn reap(&self) -> Result<usize, ServerError> {
        let cutoff = Utc::now() - Duration::hours(self.config.group_retention_hours);
        let deleted = self.db.lock().await.delete_stale_groups(cutoff)?;
        if deleted > 0 {
            info!(deleted, "reaped stale network groups");
        }
        Ok(deleted)
    }
}
