// Local online-set reconciliation.

use huddle_common::protocol::ServerEvent;
use huddle_common::types::UserId;
use std::collections::BTreeSet;

/// Client-side view of who is online, derived only from presence events.
///
/// A `Snapshot` fully replaces the set (authoritative at time of
/// arrival); `Joined`/`Left` are idempotent best-effort hints. An
/// incremental that contradicts a just-applied snapshot is an accepted
/// inconsistency window, resolved by the next snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineSet {
    online: BTreeSet<UserId>,
}

impl OnlineSet {
    /// Apply one presence event. Message events are not presence and are
    /// ignored here.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Snapshot { online_ids } => {
                self.online = online_ids.iter().cloned().collect();
            }
            ServerEvent::Joined { user_id } => {
                self.online.insert(user_id.clone());
            }
            ServerEvent::Left { user_id } => {
                self.online.remove(user_id);
            }
            ServerEvent::NewMessage { .. } => {}
        }
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    pub fn ids(&self) -> Vec<UserId> {
        self.online.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// Cleared on logout; presence from a previous session never leaks
    /// into the next.
    pub fn reset(&mut self) {
        self.online.clear();
    }
}
