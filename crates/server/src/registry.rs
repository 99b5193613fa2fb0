// Authoritative online-presence registry.
//
// One record per connected user identity; a newer connection for the same
// identity replaces the prior record (last-writer-wins). Every mutation
// broadcasts a full `Snapshot` followed by the paired `Joined`/`Left`
// incremental to all registered connections.

use chrono::{DateTime, Utc};
use huddle_common::protocol::ServerEvent;
use huddle_common::types::{Message, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Server-resident map of user identity -> active connection handle.
///
/// All mutation happens under a single write guard, and the snapshot plus
/// its incremental are enqueued to every connection before the guard is
/// released. A snapshot emitted after a mutation therefore always reflects
/// that mutation, and a later snapshot can never be overtaken by an
/// earlier one.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    connections: Arc<RwLock<HashMap<UserId, ConnectionRecord>>>,
}

#[derive(Debug, Clone)]
struct ConnectionRecord {
    connection_id: Uuid,
    established_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl PresenceRegistry {
    /// Install or replace the connection record for `user_id`, then
    /// broadcast `Snapshot` + `Joined`.
    ///
    /// Returns the connection id the socket task must present when
    /// unregistering. An empty user id (unauthenticated connection) is
    /// rejected silently: no record, no broadcast, `None` returned.
    pub async fn register(
        &self,
        user_id: &UserId,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    ) -> Option<Uuid> {
        if user_id.is_empty() {
            return None;
        }

        let connection_id = Uuid::new_v4();
        let mut guard = self.connections.write().await;
        let replaced = guard
            .insert(
                user_id.clone(),
                ConnectionRecord { connection_id, established_at: Utc::now(), outbound },
            )
            .is_some();
        if replaced {
            debug!(user_id = %user_id, "replaced existing connection for identity");
        }
        broadcast(&guard, ServerEvent::Joined { user_id: user_id.clone() });
        Some(connection_id)
    }

    /// Remove the record for `user_id`, then broadcast `Snapshot` + `Left`.
    /// Returns when the record was established, for session accounting.
    ///
    /// The record is only removed when it still belongs to the presented
    /// `connection_id`; a stale disconnect racing a newer registration is a
    /// benign no-op, as is unregistering an unknown identity. Both return
    /// `None` and broadcast nothing.
    pub async fn unregister(
        &self,
        user_id: &UserId,
        connection_id: Uuid,
    ) -> Option<DateTime<Utc>> {
        let mut guard = self.connections.write().await;
        match guard.get(user_id) {
            Some(record) if record.connection_id == connection_id => {
                let record = guard.remove(user_id)?;
                broadcast(&guard, ServerEvent::Left { user_id: user_id.clone() });
                Some(record.established_at)
            }
            Some(_) => {
                debug!(user_id = %user_id, "stale disconnect ignored, identity was re-registered");
                None
            }
            None => None,
        }
    }

    /// Forward a persisted message to its recipient's live connection.
    ///
    /// Returns false when the recipient is offline or the connection is
    /// gone; offline delivery is the storage collaborator's concern.
    pub async fn deliver(&self, recipient_id: &UserId, message: Message) -> bool {
        let guard = self.connections.read().await;
        match guard.get(recipient_id) {
            Some(record) => record.outbound.send(ServerEvent::NewMessage { message }).is_ok(),
            None => false,
        }
    }

    /// Sorted enumeration of currently online identities.
    pub async fn online_ids(&self) -> Vec<UserId> {
        let guard = self.connections.read().await;
        sorted_ids(&guard)
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.connections.read().await.contains_key(user_id)
    }
}

fn sorted_ids(connections: &HashMap<UserId, ConnectionRecord>) -> Vec<UserId> {
    let mut ids = connections.keys().cloned().collect::<Vec<_>>();
    ids.sort();
    ids
}

/// Enqueue `Snapshot` then `incremental` to every registered connection.
///
/// Callers hold the write guard, so the snapshot reflects the mutation
/// that triggered it. Send failures mean the receiving task already exited
/// and are ignored; its own unregister will follow.
fn broadcast(connections: &HashMap<UserId, ConnectionRecord>, incremental: ServerEvent) {
    let snapshot = ServerEvent::Snapshot { online_ids: sorted_ids(connections) };
    for record in connections.values() {
        let _ = record.outbound.send(snapshot.clone());
        let _ = record.outbound.send(incremental.clone());
    }
}
