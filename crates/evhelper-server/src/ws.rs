//! WebSocket transport for the city fanout.
//!
//! `GET /ws?token=<bearer>` authenticates, upgrades, and registers the
//! connection with the [`CityRouter`].  The socket then carries client
//! membership messages (`join-city` / `leave-city`) inbound and
//! [`ServerEvent`]s outbound as JSON text frames.
//!
//! A disconnect only unregisters the connection; lifecycle transitions that
//! already committed are never rolled back by a dropped socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use evhelper_shared::events::{ClientMessage, ServerEvent};
use evhelper_shared::types::UserId;

use crate::api::AppState;
use crate::auth;
use crate::error::ApiError;
use crate::rooms::{CityRouter, ConnectionId};

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// `GET /ws` — authenticate via `?token=` and upgrade.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query.token.ok_or(ApiError::Unauthorized)?;
    let user = auth::authenticate(state.engine.db(), &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, user.id, socket)))
}

async fn handle_socket(state: AppState, user_id: UserId, mut socket: WebSocket) {
    let router = state.engine.router().clone();
    let (conn_id, mut events) = router.register(user_id).await;
    info!(conn = %conn_id, user = %user_id, "websocket connected");

    loop {
        tokio::select! {
            // Engine events destined for this connection.
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }

            // Client membership messages.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let ack = handle_client_text(&router, conn_id, &text).await;
                        if send_event(&mut socket, &ack).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(e)) => {
                        debug!(conn = %conn_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    router.unregister(conn_id).await;
    info!(conn = %conn_id, user = %user_id, "websocket disconnected");
}

/// Apply one client message and produce the ack (or error) to send back.
async fn handle_client_text(
    router: &CityRouter,
    conn_id: ConnectionId,
    text: &str,
) -> ServerEvent {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(conn = %conn_id, error = %e, "unparseable client message");
            return ServerEvent::Error {
                message: format!("Unrecognized message: {e}"),
            };
        }
    };

    match message {
        ClientMessage::JoinCity { city } => match router.join_city(conn_id, &city).await {
            Some(room) => ServerEvent::CityJoined { city, room },
            None => ServerEvent::Error {
                message: "Connection is no longer registered".into(),
            },
        },
        ClientMessage::LeaveCity => {
            router.leave_city(conn_id).await;
            ServerEvent::CityLeft
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            // Serialization of our own types failing is a bug, not an I/O
            // condition; log and keep the connection alive.
            warn!(error = %e, "failed to serialize outbound event");
            Ok(())
        }
    }
}
