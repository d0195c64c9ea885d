//! Network-group store operations.
//!
//! The group key (normalized subnet) carries a UNIQUE constraint, so two
//! racing first-joins to the same unseen subnet cannot create two rows:
//! the loser's insert is a no-op and it proceeds as a member upsert.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use lanlink_shared::{GroupKey, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Group, GroupMember};

impl Database {
    /// Insert a group row if the key is unused.  Returns `true` when this
    /// call created the group; `false` means a concurrent creator won and
    /// the caller should fall back to a member upsert.
    pub fn create_group(&self, group: &Group) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT INTO network_groups
                 (key, name, ssid, active_members, last_activity, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO NOTHING",
            params![
                group.key.as_str(),
                group.name,
                group.ssid,
                group.active_members,
                group.last_activity.to_rfc3339(),
                group.is_active,
                group.created_at.to_rfc3339(),
            ],
        )?;

        if inserted > 0 {
            for member in &group.members {
                self.upsert_member(&group.key, member.user_id, member.joined_at)?;
            }
        }

        Ok(inserted > 0)
    }

    /// Fetch a group with its full member list.
    pub fn find_group(&self, key: &GroupKey) -> Result<Option<Group>> {
        let row = self
            .conn()
            .query_row(
                "SELECT key, name, ssid, active_members, last_activity, is_active, created_at
                 FROM network_groups WHERE key = ?1",
                params![key.as_str()],
                |row| {
                    let key: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let ssid: String = row.get(2)?;
                    let active_members: u32 = row.get(3)?;
                    let last_activity: String = row.get(4)?;
                    let is_active: bool = row.get(5)?;
                    let created_at: String = row.get(6)?;
                    Ok((key, name, ssid, active_members, last_activity, is_active, created_at))
                },
            )
            .optional()?;

        let Some((key, name, ssid, active_members, last_activity, is_active, created_at)) = row
        else {
            return Ok(None);
        };

        let key = GroupKey(key);
        let members = self.group_members(&key)?;

        Ok(Some(Group {
            key,
            name,
            ssid,
            members,
            active_members,
            last_activity: parse_ts(&last_activity)?,
            is_active,
            created_at: parse_ts(&created_at)?,
        }))
    }

    /// All member rows of a group (active and inactive).
    pub fn group_members(&self, key: &GroupKey) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, joined_at, is_active
             FROM group_members
             WHERE group_key = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![key.as_str()], |row| {
            let user_id: String = row.get(0)?;
            let joined_at: String = row.get(1)?;
            let is_active: bool = row.get(2)?;
            Ok((user_id, joined_at, is_active))
        })?;

        let mut members = Vec::new();
        for row in rows {
            let (user_id, joined_at, is_active) = row?;
            members.push(GroupMember {
                user_id: UserId::parse(&user_id)?,
                joined_at: parse_ts(&joined_at)?,
                is_active,
            });
        }
        Ok(members)
    }

    /// Add a member, or re-activate an existing entry and refresh its
    /// joined-at.  Member rows are never deleted.
    pub fn upsert_member(
        &self,
        key: &GroupKey,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO group_members (group_key, user_id, joined_at, is_active)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(group_key, user_id)
             DO UPDATE SET is_active = 1, joined_at = excluded.joined_at",
            params![key.as_str(), user_id.to_string(), joined_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Mark a member inactive.  Returns `true` if the member existed.
    pub fn deactivate_member(&self, key: &GroupKey, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE group_members SET is_active = 0
             WHERE group_key = ?1 AND user_id = ?2",
            params![key.as_str(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Recompute the derived active-member count from the member rows and
    /// flip the group's is-active flag accordingly.
    pub fn refresh_member_counts(&self, key: &GroupKey) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members
             WHERE group_key = ?1 AND is_active = 1",
            params![key.as_str()],
            |row| row.get(0),
        )?;

        self.conn().execute(
            "UPDATE network_groups SET active_members = ?2, is_active = ?3 WHERE key = ?1",
            params![key.as_str(), count, count > 0],
        )?;

        Ok(count)
    }

    /// Refresh a group's last-activity timestamp and mark it active.
    pub fn touch_group_activity(&self, key: &GroupKey, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE network_groups SET last_activity = ?2, is_active = 1 WHERE key = ?1",
            params![key.as_str(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete every group that is inactive and whose last activity is older
    /// than `cutoff`.  Returns the number of deleted groups.
    pub fn delete_stale_groups(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM network_groups
             WHERE is_active = 0 AND last_activity < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_test_db, test_user};
    use chrono::Duration;

    fn new_group(key: &str, member: UserId) -> Group {
        let now = Utc::now();
        Group {
            key: GroupKey::from(key),
            name: format!("Local Network {key}"),
            ssid: "Unknown Network".into(),
            members: vec![GroupMember {
                user_id: member,
                joined_at: now,
                is_active: true,
            }],
            active_members: 1,
            last_activity: now,
            is_active: true,
            created_at: now,
        }
    }

    #[test]
    fn create_is_idempotent_on_key_conflict() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");

        assert!(db.create_group(&new_group("192.168.1", alice.id)).unwrap());
        // Losing side of the race: insert is a no-op.
        assert!(!db.create_group(&new_group("192.168.1", bob.id)).unwrap());

        let group = db.find_group(&GroupKey::from("192.168.1")).unwrap().unwrap();
        assert_eq!(group.members.len(), 1);
    }

    #[test]
    fn upsert_reactivates_existing_member() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let key = GroupKey::from("10.0.0");

        db.create_group(&new_group("10.0.0", alice.id)).unwrap();
        assert!(db.deactivate_member(&key, alice.id).unwrap());
        assert_eq!(db.refresh_member_counts(&key).unwrap(), 0);

        db.upsert_member(&key, alice.id, Utc::now()).unwrap();
        assert_eq!(db.refresh_member_counts(&key).unwrap(), 1);

        // Rejoin did not duplicate the member row.
        let group = db.find_group(&key).unwrap().unwrap();
        assert_eq!(group.members.len(), 1);
        assert!(group.is_active);
    }

    #[test]
    fn active_count_tracks_member_flags() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let bob = test_user(&db, "bob");
        let key = GroupKey::from("172.16.4");

        db.create_group(&new_group("172.16.4", alice.id)).unwrap();
        db.upsert_member(&key, bob.id, Utc::now()).unwrap();
        assert_eq!(db.refresh_member_counts(&key).unwrap(), 2);

        db.deactivate_member(&key, alice.id).unwrap();
        assert_eq!(db.refresh_member_counts(&key).unwrap(), 1);
        assert!(db.find_group(&key).unwrap().unwrap().is_active);

        db.deactivate_member(&key, bob.id).unwrap();
        assert_eq!(db.refresh_member_counts(&key).unwrap(), 0);
        assert!(!db.find_group(&key).unwrap().unwrap().is_active);
    }

    #[test]
    fn stale_deletion_respects_retention_window() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        let key = GroupKey::from("192.168.7");

        db.create_group(&new_group("192.168.7", alice.id)).unwrap();
        db.deactivate_member(&key, alice.id).unwrap();
        db.refresh_member_counts(&key).unwrap();

        // Inactive but still inside the retention window: kept.
        let cutoff = Utc::now() - Duration::hours(24);
        assert_eq!(db.delete_stale_groups(cutoff).unwrap(), 0);
        assert!(db.find_group(&key).unwrap().is_some());

        // Outside the window: deleted.
        let cutoff = Utc::now() + Duration::hours(1);
        assert_eq!(db.delete_stale_groups(cutoff).unwrap(), 1);
        assert!(db.find_group(&key).unwrap().is_none());
    }

    #[test]
    fn active_groups_survive_the_reaper() {
        let (_dir, db) = open_test_db();
        let alice = test_user(&db, "alice");
        db.create_group(&new_group("10.1.1", alice.id)).unwrap();

        let cutoff = Utc::now() + Duration::hours(48);
        assert_eq!(db.delete_stale_groups(cutoff).unwrap(), 0);
    }
}
