//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `network_history`, `network_groups`,
//! `group_members`, `messages`, and `message_reads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                 TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username           TEXT NOT NULL UNIQUE,
    avatar             TEXT,
    status             TEXT,
    device_type        TEXT NOT NULL DEFAULT 'laptop',
    is_online          INTEGER NOT NULL DEFAULT 0,
    last_seen          TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    net_subnet         TEXT,                       -- current network, all-or-nothing
    net_ssid           TEXT,
    net_address        TEXT,
    net_last_connected TEXT,
    created_at         TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Network history (bounded to the most recent 50 rows per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS network_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         TEXT NOT NULL,                 -- FK -> users(id)
    subnet          TEXT NOT NULL,
    ssid            TEXT NOT NULL,
    connected_at    TEXT NOT NULL,
    disconnected_at TEXT,                          -- NULL = still open

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_user ON network_history(user_id, id);

-- ----------------------------------------------------------------
-- Network groups (keyed by subnet)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS network_groups (
    key            TEXT PRIMARY KEY NOT NULL,      -- normalized subnet
    name           TEXT NOT NULL,
    ssid           TEXT NOT NULL,
    active_members INTEGER NOT NULL DEFAULT 0,
    last_activity  TEXT NOT NULL,
    is_active      INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_groups_stale ON network_groups(is_active, last_activity);

-- ----------------------------------------------------------------
-- Group members (never deleted, only deactivated)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_key TEXT NOT NULL,                       -- FK -> network_groups(key)
    user_id   TEXT NOT NULL,                       -- FK -> users(id)
    joined_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,

    PRIMARY KEY (group_key, user_id),
    FOREIGN KEY (group_key) REFERENCES network_groups(key) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages (exactly one of recipient_id / group_key is set)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id         TEXT NOT NULL,               -- FK -> users(id)
    recipient_id      TEXT,                        -- direct message target
    group_key         TEXT,                        -- group message target
    content           TEXT,                        -- plaintext body
    encrypted_content BLOB,                        -- nonce || ciphertext
    message_type      TEXT NOT NULL DEFAULT 'text',
    file_url          TEXT,
    file_name         TEXT,
    file_size         INTEGER,
    is_deleted        INTEGER NOT NULL DEFAULT 0,
    deleted_at        TEXT,
    created_at        TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id),
    CHECK ((recipient_id IS NULL) <> (group_key IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_messages_direct
    ON messages(sender_id, recipient_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_key, created_at DESC);

-- ----------------------------------------------------------------
-- Read receipts (one row per reader per message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,                      -- FK -> messages(id)
    user_id    TEXT NOT NULL,                      -- FK -> users(id)
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
