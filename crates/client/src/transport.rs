// WebSocket transport for the realtime channel.

use crate::session::{EventSource, Transport};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use huddle_common::protocol::decode_event;
use huddle_common::types::UserId;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tracing::{debug, warn};

/// Transport that opens a websocket against the presence server and
/// feeds decoded events into the session.
///
/// The connection identifies itself through the `user_id` query
/// parameter; the server's first frame is a presence snapshot.
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the server root without a trailing slash, e.g.
    /// `ws://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    fn channel_url(&self, user_id: &UserId) -> String {
        format!("{}/ws?user_id={}", self.base_url, user_id.as_str())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn activate(&self, user_id: &UserId) -> anyhow::Result<EventSource> {
        let url = self.channel_url(user_id);
        let (mut stream, _response) = connect_async(&url)
            .await
            .with_context(|| format!("failed to open realtime channel: {url}"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsFrame::Text(payload)) => match decode_event(payload.as_str()) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            // Unknown frames are skipped, not fatal.
                            warn!(error = %err, "dropping undecodable frame");
                        }
                    },
                    Ok(WsFrame::Ping(payload)) => {
                        if stream.send(WsFrame::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsFrame::Close(_)) => {
                        debug!("realtime channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "realtime channel read failed");
                        break;
                    }
                }
            }
        });

        Ok(EventSource { events: rx, reader: Some(reader) })
    }
}
