//! Helpers shared by the store's unit tests.

use chrono::Utc;
use tempfile::TempDir;

use lanlink_shared::{DeviceType, UserId};

use crate::database::Database;
use crate::models::User;

/// Open a fresh database in a temp directory.  The directory guard must be
/// kept alive for the lifetime of the database.
pub fn open_test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("test.db")).unwrap();
    (dir, db)
}

/// Insert and return a minimal user.
pub fn test_user(db: &Database, username: &str) -> User {
    let user = User {
        id: UserId::new(),
        username: username.to_string(),
        avatar: None,
        status: None,
        device_type: DeviceType::Laptop,
        is_online: false,
        last_seen: Utc::now(),
        current_network: None,
        created_at: Utc::now(),
    };
    db.insert_user(&user).unwrap();
    user
}
