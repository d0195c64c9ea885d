//! Helpers shared by the server's unit tests.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};

use lanlink_shared::{DeviceType, UserId};
use lanlink_store::{Database, User};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::groups::GroupCoordinator;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::ws::AppState;

pub struct TestState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub coordinator: Arc<GroupCoordinator>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
    pub alice: UserId,
    pub bob: UserId,
}

impl TestState {
    /// The same engine viewed as the shared handler state.
    pub fn app_state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            presence: self.presence.clone(),
            coordinator: self.coordinator.clone(),
            router: self.router.clone(),
            config: self.config.clone(),
        }
    }
}

fn insert_user(db: &Database, username: &str) -> UserId {
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
    user.id
}

/// Build a full engine over an in-memory database with two registered
/// users.
pub async fn test_state() -> TestState {
    let db = Database::open_in_memory().unwrap();
    let alice = insert_user(&db, "alice");
    let bob = insert_user(&db, "bob");

    let db = Arc::new(Mutex::new(db));
    let presence = PresenceRegistry::new();
    let config = Arc::new(ServerConfig::default());
    let coordinator = Arc::new(GroupCoordinator::new(
        db.clone(),
        presence.clone(),
        config.clone(),
    ));
    let router = Arc::new(MessageRouter::new(
        db.clone(),
        presence.clone(),
        config.clone(),
    ));

    TestState {
        db,
        presence,
        coordinator,
        router,
        config,
        alice,
        bob,
    }
}

/// Register a live presence entry and return the receiving end of its
/// connection channel.
pub async fn register_presence(
    presence: &PresenceRegistry,
    user: UserId,
) -> mpsc::Receiver<ServerEvent> {
    let (tx, rx) = mpsc::channel(64);
    presence.register(user, tx).await;
    rx
}
