//! User directory operations.
//!
//! The engine only mutates a user's network and liveness fields; account
//! data (username, avatar) is written by the registration flow outside
//! this crate.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use lanlink_shared::constants::NETWORK_HISTORY_LIMIT;
use lanlink_shared::{DeviceType, GroupKey, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CurrentNetwork, NetworkHistoryEntry, User};

impl Database {
    /// Insert a new user record.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, avatar, status, device_type, is_online,
                                last_seen, net_subnet, net_ssid, net_address,
                                net_last_connected, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id.to_string(),
                user.username,
                user.avatar,
                user.status,
                user.device_type.as_str(),
                user.is_online,
                user.last_seen.to_rfc3339(),
                user.current_network.as_ref().map(|n| n.subnet.as_str()),
                user.current_network.as_ref().map(|n| n.ssid.clone()),
                user.current_network.as_ref().map(|n| n.address.clone()),
                user.current_network
                    .as_ref()
                    .map(|n| n.last_connected.to_rfc3339()),
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, avatar, status, device_type, is_online, last_seen,
                        net_subnet, net_ssid, net_address, net_last_connected, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Set the durable online flag and refresh last-seen.
    pub fn set_online(&self, id: UserId, online: bool, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
            params![id.to_string(), online, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Update the device type observed for a user's latest connection.
    pub fn set_device_type(&self, id: UserId, device_type: DeviceType) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET device_type = ?2 WHERE id = ?1",
            params![id.to_string(), device_type.as_str()],
        )?;
        Ok(())
    }

    /// Record a new network connection: set the current-network fields and
    /// append a history entry, truncating the history to the most recent
    /// [`NETWORK_HISTORY_LIMIT`] rows.  Runs in one transaction.
    ///
    /// Any entry still open from an earlier connection is closed first, so
    /// at most one entry per user is ever open.
    pub fn set_current_network(&mut self, id: UserId, network: &CurrentNetwork) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "UPDATE network_history SET disconnected_at = ?2
             WHERE user_id = ?1 AND disconnected_at IS NULL",
            params![id.to_string(), network.last_connected.to_rfc3339()],
        )?;

        tx.execute(
            "UPDATE users
             SET net_subnet = ?2, net_ssid = ?3, net_address = ?4, net_last_connected = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                network.subnet.as_str(),
                network.ssid,
                network.address,
                network.last_connected.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "INSERT INTO network_history (user_id, subnet, ssid, connected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                network.subnet.as_str(),
                network.ssid,
                network.last_connected.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM network_history
             WHERE user_id = ?1
               AND id NOT IN (
                   SELECT id FROM network_history
                   WHERE user_id = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![id.to_string(), NETWORK_HISTORY_LIMIT],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Clear the user's current-network fields.
    pub fn clear_current_network(&self, id: UserId) -> Result<()> {
        self.conn().execute(
            "UPDATE users
             SET net_subnet = NULL, net_ssid = NULL, net_address = NULL,
                 net_last_connected = NULL
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Close the still-open history entry for the given subnet, if any.
    /// The invariant (at most one open entry per user) is preserved because
    /// entries are only opened by [`Self::set_current_network`] after the
    /// previous connection was closed.
    pub fn close_open_history_entry(
        &self,
        id: UserId,
        subnet: &GroupKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE network_history
             SET disconnected_at = ?3
             WHERE user_id = ?1 AND subnet = ?2 AND disconnected_at IS NULL",
            params![id.to_string(), subnet.as_str(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Full network history for a user, most recent first.
    pub fn network_history(&self, id: UserId) -> Result<Vec<NetworkHistoryEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT subnet, ssid, connected_at, disconnected_at
             FROM network_history
             WHERE user_id = ?1
             ORDER BY id DESC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let subnet: String = row.get(0)?;
            let ssid: String = row.get(1)?;
            let connected: String = row.get(2)?;
            let disconnected: Option<String> = row.get(3)?;
            Ok((subnet, ssid, connected, disconnected))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (subnet, ssid, connected, disconnected) = row?;
            entries.push(NetworkHistoryEntry {
                subnet: GroupKey(subnet),
                ssid,
                connected_at: parse_ts(&connected)?,
                disconnected_at: disconnected.as_deref().map(parse_ts).transpose()?,
            });
        }
        Ok(entries)
    }

    /// Look up a user's current subnet without loading the full record.
    pub fn current_subnet(&self, id: UserId) -> Result<Option<GroupKey>> {
        let subnet: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT net_subnet FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(subnet.flatten().map(GroupKey))
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let status: Option<String> = row.get(3)?;
    let device_type: String = row.get(4)?;
    let is_online: bool = row.get(5)?;
    let last_seen: String = row.get(6)?;
    let net_subnet: Option<String> = row.get(7)?;
    let net_ssid: Option<String> = row.get(8)?;
    let net_address: Option<String> = row.get(9)?;
    let net_last_connected: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let current_network = match (net_subnet, net_ssid, net_address, net_last_connected) {
        (Some(subnet), Some(ssid), Some(address), Some(connected)) => Some(CurrentNetwork {
            subnet: GroupKey(subnet),
            ssid,
            address,
            last_connected: parse_rfc3339(connected, 10)?,
        }),
        _ => None,
    };

    Ok(User {
        id,
        username,
        avatar,
        status,
        device_type: DeviceType::from_str(&device_type),
        is_online,
        last_seen: parse_rfc3339(last_seen, 6)?,
        current_network,
        created_at: parse_rfc3339(created_at, 11)?,
    })
}

fn parse_rfc3339(s: String, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}
