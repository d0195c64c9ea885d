//! # lanlink-server
//!
//! Presence and messaging engine for devices on the same local network.
//!
//! This binary provides:
//! - **Subnet-derived grouping**: clients are placed into a group keyed by
//!   their network prefix, no manual room management
//! - **WebSocket sessions** (axum) carrying typed events for presence,
//!   direct and group messaging, typing indicators, and read receipts
//! - **Encrypted message bodies**: every conversation gets its own derived
//!   key, ciphertext is stored alongside the message
//! - **SQLite persistence** for users, groups, history, and messages
//! - **Stale-group reaper** that deletes groups idle past the retention
//!   window

mod auth;
mod config;
mod error;
mod events;
mod groups;
mod presence;
mod router;
mod session;
#[cfg(test)]
mod test_support;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanlink_store::Database;

use crate::config::ServerConfig;
use crate::groups::GroupCoordinator;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::ws::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lanlink_server=debug")),
        )
        .init();

    info!("Starting lanlink server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        listen = %config.listen_addr,
        allow_loopback = config.allow_loopback,
        retention_hours = config.group_retention_hours,
        "Loaded configuration"
    );

    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database ready");
    }

    let db = Arc::new(Mutex::new(db));
    let presence = PresenceRegistry::new();
    let config = Arc::new(config);
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

    let state = AppState {
        db,
        presence,
        coordinator: coordinator.clone(),
        router,
        config: config.clone(),
    };

    // Periodic stale-group reaper.
    let reap_interval = std::time::Duration::from_secs(config.reap_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        // The first tick fires immediately and cleans up after a restart.
        loop {
            interval.tick().await;
            if let Err(e) = coordinator.reap().await {
                warn!(error = %e, "group reaper pass failed");
            }
        }
    });

    let listen_addr = config.listen_addr;
    tokio::select! {
        result = ws::serve(state, listen_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
