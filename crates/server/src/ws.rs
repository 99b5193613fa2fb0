// Realtime presence channel and message-delivery endpoints.

use crate::error::{ErrorCode, ServerError};
use crate::registry::PresenceRegistry;
use axum::{
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use huddle_common::protocol::{encode_event, ServerEvent};
use huddle_common::types::{Message, UserId};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Server-side liveness probing: ping every `interval`, evict when a
/// ping has gone `timeout` past due.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            timeout: Duration::from_millis(HEARTBEAT_TIMEOUT_MS),
        }
    }
}

impl Heartbeat {
    /// How long a connection may go without a pong before eviction.
    ///
    /// Measured from connect (and from each pong), so it must cover one
    /// full interval before the first ping even goes out, plus the pong
    /// grace period after it.
    fn deadline(&self) -> Duration {
        self.interval + self.timeout
    }
}

#[derive(Clone)]
struct WsState {
    registry: PresenceRegistry,
    heartbeat: Heartbeat,
}

pub fn router(registry: PresenceRegistry) -> Router {
    router_with_heartbeat(registry, Heartbeat::default())
}

pub fn router_with_heartbeat(registry: PresenceRegistry, heartbeat: Heartbeat) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/presence", get(list_presence))
        .route("/messages/{recipient_id}", post(deliver_message))
        .with_state(WsState { registry, heartbeat })
}

/// Identity token carried as connection metadata at open time.
///
/// The registry keys strictly on this value; a missing or empty id means
/// the socket is served but never registered.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    user_id: Option<String>,
}

async fn ws_upgrade(
    Query(params): Query<ConnectParams>,
    State(state): State<WsState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = params.user_id.filter(|id| !id.is_empty()).map(UserId::new);
    ws.on_upgrade(move |socket| handle_socket(state.registry, state.heartbeat, identity, socket))
}

async fn handle_socket(
    registry: PresenceRegistry,
    heartbeat: Heartbeat,
    identity: Option<UserId>,
    mut socket: WebSocket,
) {
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();

    let registration = match &identity {
        Some(user_id) => {
            info!(user_id = %user_id, "user connected");
            registry
                .register(user_id, outbound_sender)
                .await
                .map(|connection_id| (user_id.clone(), connection_id))
        }
        None => {
            debug!("unauthenticated websocket served without presence registration");
            None
        }
    };

    // Heartbeat: server pings every interval, disconnects when a pong is
    // more than one interval plus the grace period overdue.
    let mut heartbeat_interval = tokio::time::interval(heartbeat.interval);
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat.deadline() {
                    warn!(user_id = ?identity, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(WsFrame::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_frame = socket.recv() => {
                let Some(frame) = maybe_frame else {
                    break;
                };

                match frame {
                    Ok(WsFrame::Ping(payload)) => {
                        if socket.send(WsFrame::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsFrame::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(WsFrame::Close(_)) => break,
                    // The channel is server -> client; inbound text frames
                    // carry nothing this endpoint acts on.
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    if let Some((user_id, connection_id)) = registration {
        if let Some(established_at) = registry.unregister(&user_id, connection_id).await {
            let session_secs = (Utc::now() - established_at).num_seconds();
            info!(user_id = %user_id, session_secs, "user disconnected");
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(WsFrame::Text(encoded.into())).await.map_err(|_| ())
}

async fn list_presence(State(state): State<WsState>) -> impl IntoResponse {
    Json(state.registry.online_ids().await)
}

/// Delivery hook for the message-storage collaborator: after persisting a
/// message it posts the stored record here for realtime fanout.
///
/// Responds 202 whether or not the recipient is online; offline delivery
/// is the storage layer's concern.
async fn deliver_message(
    Path(recipient_id): Path<String>,
    State(state): State<WsState>,
    Json(message): Json<Message>,
) -> Result<impl IntoResponse, ServerError> {
    let recipient = UserId::new(recipient_id);
    if recipient.is_empty() {
        return Err(ServerError::new(ErrorCode::ValidationFailed, "recipient id is empty"));
    }
    if message.recipient_id != recipient {
        return Err(ServerError::new(
            ErrorCode::ValidationFailed,
            "message recipient does not match path",
        ));
    }

    let delivered = state.registry.deliver(&recipient, message).await;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "delivered": delivered }))))
}
