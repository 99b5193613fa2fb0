// WebSocket message types for the huddle-presence.v1 protocol.

use serde::{Deserialize, Serialize};

use crate::types::{Message, UserId};

/// All server -> client frames in the huddle-presence.v1 protocol.
///
/// `Snapshot` is the authoritative truth at time of send; `Joined` and
/// `Left` are low-latency hints that must never contradict a later
/// snapshot. Every registry mutation emits a snapshot followed by its
/// paired incremental, so a client that only understands snapshots still
/// converges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full enumeration of online identities.
    Snapshot { online_ids: Vec<UserId> },

    /// A single identity came online.
    Joined { user_id: UserId },

    /// A single identity went offline.
    Left { user_id: UserId },

    /// A persisted message delivered to its recipient's connection.
    NewMessage { message: Message },
}

impl ServerEvent {
    /// The wire tag for this frame, used by clients to register and remove
    /// handlers by event name.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => EVENT_SNAPSHOT,
            Self::Joined { .. } => EVENT_JOINED,
            Self::Left { .. } => EVENT_LEFT,
            Self::NewMessage { .. } => EVENT_NEW_MESSAGE,
        }
    }
}

pub const EVENT_SNAPSHOT: &str = "snapshot";
pub const EVENT_JOINED: &str = "joined";
pub const EVENT_LEFT: &str = "left";
pub const EVENT_NEW_MESSAGE: &str = "new_message";

/// The full set of presence/message event names a session subscribes to.
pub const SESSION_EVENTS: [&str; 4] =
    [EVENT_SNAPSHOT, EVENT_JOINED, EVENT_LEFT, EVENT_NEW_MESSAGE];

pub fn decode_event(raw: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str::<ServerEvent>(raw)
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn snapshot_wire_shape() {
        let event =
            ServerEvent::Snapshot { online_ids: vec![UserId::new("u1"), UserId::new("u2")] };
        let raw = encode_event(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["online_ids"], serde_json::json!(["u1", "u2"]));
    }

    #[test]
    fn incremental_wire_shape() {
        let raw = encode_event(&ServerEvent::Joined { user_id: UserId::new("u9") }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "joined");
        assert_eq!(value["user_id"], "u9");
    }

    #[test]
    fn message_roundtrip() {
        let event = ServerEvent::NewMessage {
            message: Message {
                id: Uuid::new_v4(),
                sender_id: UserId::new("a"),
                recipient_id: UserId::new("b"),
                text: "hey".into(),
                seen: false,
                created_at: Utc::now(),
            },
        };
        let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn event_names_match_wire_tags() {
        let joined = ServerEvent::Joined { user_id: UserId::new("u") };
        assert_eq!(joined.event_name(), "joined");
        let raw = encode_event(&joined).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], joined.event_name());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(decode_event(r#"{"type":"mystery"}"#).is_err());
    }
}
