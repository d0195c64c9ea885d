//! Per-connection session loop.
//!
//! One task per accepted WebSocket.  The loop multiplexes two sources:
//! frames arriving from the client, and server events queued on the
//! connection's presence channel.  All outbound traffic funnels through
//! that channel so frames are written by exactly one task.
//!
//! Teardown order on any exit path: durable online flag first, then the
//! group (so remaining members get a leave notice), then the presence
//! entry itself.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lanlink_shared::constants::LOOPBACK_TEST_ADDR;
use lanlink_shared::network::is_loopback_addr;
use lanlink_shared::UserId;
use lanlink_store::User;

use crate::error::ServerError;
use crate::events::{ClientEvent, ServerEvent};
use crate::ws::AppState;

/// Outbound queue depth per connection.  A client that cannot drain this
/// many events starts losing fan-out traffic (dropped, not buffered).
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub async fn run(mut socket: WebSocket, user: User, peer: SocketAddr, state: AppState) {
    let user_id = user.id;

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_CAPACITY);
    state.presence.register(user_id, tx).await;

    if let Err(e) = state.db.lock().await.set_online(user_id, true, Utc::now()) {
        warn!(user = %user_id, error = %e, "failed to persist online flag");
    }

    info!(user = %user_id, peer = %peer, "connection opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &user, peer, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the protocol layer; binary
                    // frames have no meaning here.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user = %user_id, error = %e, "socket read error");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(user = %user_id, error = %e, "failed to serialize event");
                        }
                    },
                    // Registry evicted this connection's handle.
                    None => break,
                }
            }
        }
    }

    disconnect(&state, user_id).await;
    info!(user = %user_id, "connection closed");
}

async fn handle_frame(state: &AppState, user: &User, peer: SocketAddr, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(user = %user.id, error = %e, "unparseable client event");
            state
                .presence
                .send_to(
                    user.id,
                    ServerEvent::Error {
                        message: "Invalid event payload".to_string(),
                    },
                )
                .await;
            return;
        }
    };

    if let Err(e) = dispatch(state, user, peer, event).await {
        let message = match &e {
            ServerError::Store(_) | ServerError::Crypto(_) | ServerError::Internal(_) => {
                warn!(user = %user.id, error = %e, "event handling failed");
                "Internal server error".to_string()
            }
            _ => e.to_string(),
        };
        state
            .presence
            .send_to(user.id, ServerEvent::Error { message })
            .await;
    }
}

async fn dispatch(
    state: &AppState,
    user: &User,
    peer: SocketAddr,
    event: ClientEvent,
) -> Result<(), ServerError> {
    match event {
        ClientEvent::JoinNetwork {
            address,
            ssid,
            subnet,
        } => {
            let addr = effective_address(address.as_deref(), peer, state.config.allow_loopback);
            let reply = match state
                .coordinator
                .join(user.id, Some(addr.as_str()), ssid.as_deref(), subnet)
                .await
            {
                Ok(snapshot) => ServerEvent::NetworkJoined {
                    group: Some(snapshot.group),
                    members: snapshot.members,
                    error: None,
                },
                Err(ServerError::InvalidNetwork) => ServerEvent::NetworkJoined {
                    group: None,
                    members: Vec::new(),
                    error: Some(ServerError::InvalidNetwork.to_string()),
                },
                Err(e) => return Err(e),
            };
            state.presence.send_to(user.id, reply).await;
        }

        ClientEvent::LeaveNetwork { subnet } => {
            state.coordinator.leave(user.id, &subnet).await?;
        }

        ClientEvent::SendMessage {
            recipient_id,
            content,
            message_type,
            attachment,
        } => {
            state
                .router
                .send_direct(user.id, recipient_id, content, message_type, attachment)
                .await?;
        }

        ClientEvent::SendGroupMessage {
            subnet,
            content,
            message_type,
            attachment,
        } => {
            state
                .router
                .send_group(user.id, subnet, content, message_type, attachment)
                .await?;
        }

        ClientEvent::Typing {
            recipient_id,
            is_typing,
        } => {
            state
                .router
                .relay_typing(user.id, &user.username, recipient_id, is_typing)
                .await;
        }

        ClientEvent::TypingGroup { subnet, is_typing } => {
            state
                .router
                .relay_typing_group(user.id, &user.username, &subnet, is_typing)
                .await;
        }

        ClientEvent::MarkRead { message_id } => {
            state.router.mark_read(message_id, user.id).await?;
        }

        ClientEvent::GetNetworkUsers => {
            let reply = match state.presence.current_group(user.id).await {
                Some(key) => {
                    let members = state
                        .coordinator
                        .snapshot(&key)
                        .await?
                        .map(|s| s.members)
                        .unwrap_or_default();
                    ServerEvent::MembersUpdate {
                        subnet: Some(key),
                        members,
                    }
                }
                None => ServerEvent::MembersUpdate {
                    subnet: None,
                    members: Vec::new(),
                },
            };
            state.presence.send_to(user.id, reply).await;
        }
    }

    Ok(())
}

/// Address used for group resolution: the client-reported address when
/// present, the socket peer otherwise.  With loopback allowed, localhost
/// clients are mapped onto a fixed private address so they land in a
/// joinable test group.
fn effective_address(explicit: Option<&str>, peer: SocketAddr, allow_loopback: bool) -> String {
    let addr = match explicit {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => peer.ip().to_string(),
    };
    if allow_loopback && is_loopback_addr(&addr) {
        LOOPBACK_TEST_ADDR.to_string()
    } else {
        addr
    }
}

/// Shared teardown for clean closes and dropped sockets alike.
async fn disconnect(state: &AppState, user: UserId) {
    if let Err(e) = state.db.lock().await.set_online(user, false, Utc::now()) {
        warn!(user = %user, error = %e, "failed to persist offline flag");
    }

    if let Some(key) = state.presence.current_group(user).await {
        if let Err(e) = state.coordinator.leave(user, &key).await {
            warn!(user = %user, group = %key, error = %e, "leave on disconnect failed");
        }
    }

    state.presence.unregister(user).await;
}
