//! HTTP surface: health probe and the WebSocket upgrade endpoint.
//!
//! Authentication happens at upgrade time, before the socket is
//! accepted.  A connection that reaches the session loop always belongs
//! to a known user.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lanlink_shared::network::detect_device_type;
use lanlink_store::{Database, StoreError};

use crate::auth;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::groups::GroupCoordinator;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;
use crate::session;

/// Shared handler state; cheap to clone, all clones share the engine.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub coordinator: Arc<GroupCoordinator>,
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.presence.len().await,
    })
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ServerError> {
    let user_id =
        auth::verify_token(&query.token, &state.config.auth_secret).ok_or_else(|| {
            warn!(peer = %peer, "websocket upgrade with invalid token");
            ServerError::NotAuthenticated
        })?;

    let mut user = {
        let db = state.db.lock().await;
        match db.get_user(user_id) {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                warn!(peer = %peer, user = %user_id, "token for unknown user");
                return Err(ServerError::NotAuthenticated);
            }
            Err(e) => return Err(e.into()),
        }
    };

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok());
    let device_type = detect_device_type(user_agent);
    if device_type != user.device_type {
        state
            .db
            .lock()
            .await
            .set_device_type(user_id, device_type)?;
        user.device_type = device_type;
    }

    Ok(ws.on_upgrade(move |socket| session::run(socket, user, peer, state)))
}
