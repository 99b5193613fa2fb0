// Message and unseen-counter state machine.

use huddle_common::types::{Message, UserId};
use std::collections::HashMap;
use uuid::Uuid;

/// What the state machine decided about an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The sender is the selected conversation partner: the message was
    /// marked seen and appended. The caller owes the backend a
    /// fire-and-forget seen acknowledgement for this id.
    SeenInConversation { message_id: Uuid },
    /// Counted against the sender's unseen total.
    CountedUnseen { sender_id: UserId, total: u64 },
}

/// Client-resident conversation state.
///
/// `unseen` is derived state, rebuilt from the inbound event stream and
/// the fetch operation; nothing outside this type mutates it.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    messages: Vec<Message>,
    selected: Option<UserId>,
    unseen: HashMap<UserId, u64>,
}

impl ChatState {
    /// Classify an inbound message against the active conversation.
    pub fn handle_incoming(&mut self, mut message: Message) -> InboundOutcome {
        if self.selected.as_ref() == Some(&message.sender_id) {
            message.seen = true;
            let message_id = message.id;
            self.messages.push(message);
            InboundOutcome::SeenInConversation { message_id }
        } else {
            let total = self.unseen.entry(message.sender_id.clone()).or_insert(0);
            *total += 1;
            InboundOutcome::CountedUnseen { sender_id: message.sender_id, total: *total }
        }
    }

    /// Switch the active conversation, replacing the visible sequence
    /// with fetched history. Clearing the partner's unseen counter is a
    /// side effect coordinated with the fetch, not something inbound
    /// events ever do retroactively.
    pub fn select_peer(&mut self, peer_id: UserId, history: Vec<Message>) {
        self.unseen.remove(&peer_id);
        self.selected = Some(peer_id);
        self.messages = history;
    }

    /// Append a message the storage collaborator created on our behalf.
    pub fn append_sent(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn selected(&self) -> Option<&UserId> {
        self.selected.as_ref()
    }

    /// Drop the selection when it points at `user_id`.
    pub fn clear_selection_of(&mut self, user_id: &UserId) {
        if self.selected.as_ref() == Some(user_id) {
            self.selected = None;
            self.messages.clear();
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unseen_count(&self, sender_id: &UserId) -> u64 {
        self.unseen.get(sender_id).copied().unwrap_or(0)
    }

    pub fn unseen_counts(&self) -> &HashMap<UserId, u64> {
        &self.unseen
    }

    /// Remove a contact's counter entirely (used when hiding a contact).
    pub fn purge_unseen(&mut self, user_id: &UserId) {
        self.unseen.remove(user_id);
    }

    /// Drop counters for senders not on the current roster.
    pub fn prune_unseen(&mut self, roster: &[UserId]) {
        self.unseen.retain(|sender_id, _| roster.contains(sender_id));
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.selected = None;
        self.unseen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    fn inbound(sender: &str, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: user(sender),
            recipient_id: user("me"),
            text: text.into(),
            seen: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unselected_sender_increments_counter() {
        let mut chat = ChatState::default();
        for n in 1..=3 {
            let outcome = chat.handle_incoming(inbound("s", "hey"));
            assert_eq!(
                outcome,
                InboundOutcome::CountedUnseen { sender_id: user("s"), total: n }
            );
        }
        assert_eq!(chat.unseen_count(&user("s")), 3);
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn selected_sender_is_seen_and_appended() {
        let mut chat = ChatState::default();
        chat.select_peer(user("s"), Vec::new());

        let message = inbound("s", "hello");
        let message_id = message.id;
        let outcome = chat.handle_incoming(message);

        assert_eq!(outcome, InboundOutcome::SeenInConversation { message_id });
        assert_eq!(chat.messages().len(), 1);
        assert!(chat.messages()[0].seen);
        assert_eq!(chat.unseen_count(&user("s")), 0);
    }

    #[test]
    fn switching_selection_clears_that_peers_counter_only() {
        let mut chat = ChatState::default();
        chat.handle_incoming(inbound("s", "one"));
        chat.handle_incoming(inbound("s", "two"));
        chat.handle_incoming(inbound("t", "other"));

        chat.select_peer(user("s"), vec![inbound("s", "one"), inbound("s", "two")]);

        assert_eq!(chat.unseen_count(&user("s")), 0);
        assert_eq!(chat.unseen_count(&user("t")), 1);
        assert_eq!(chat.messages().len(), 2);

        // A further message from the now-selected peer is seen, not counted.
        let outcome = chat.handle_incoming(inbound("s", "three"));
        assert!(matches!(outcome, InboundOutcome::SeenInConversation { .. }));
        assert_eq!(chat.unseen_count(&user("s")), 0);
        assert_eq!(chat.messages().len(), 3);
    }

    #[test]
    fn clear_selection_only_when_it_matches() {
        let mut chat = ChatState::default();
        chat.select_peer(user("s"), vec![inbound("s", "hi")]);

        chat.clear_selection_of(&user("other"));
        assert_eq!(chat.selected(), Some(&user("s")));

        chat.clear_selection_of(&user("s"));
        assert_eq!(chat.selected(), None);
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn purge_unseen_drops_the_entry() {
        let mut chat = ChatState::default();
        chat.handle_incoming(inbound("s", "hey"));
        chat.purge_unseen(&user("s"));
        assert_eq!(chat.unseen_count(&user("s")), 0);
        assert!(chat.unseen_counts().is_empty());
    }

    #[test]
    fn prune_unseen_keeps_only_roster_senders() {
        let mut chat = ChatState::default();
        chat.handle_incoming(inbound("s", "one"));
        chat.handle_incoming(inbound("t", "two"));
        chat.handle_incoming(inbound("gone", "three"));

        chat.prune_unseen(&[user("s"), user("t")]);

        assert_eq!(chat.unseen_count(&user("s")), 1);
        assert_eq!(chat.unseen_count(&user("t")), 1);
        assert_eq!(chat.unseen_count(&user("gone")), 0);
        assert_eq!(chat.unseen_counts().len(), 2);
    }

    #[test]
    fn append_sent_keeps_order() {
        let mut chat = ChatState::default();
        chat.select_peer(user("s"), Vec::new());
        chat.append_sent(inbound("me", "first"));
        chat.append_sent(inbound("me", "second"));
        assert_eq!(chat.messages()[0].text, "first");
        assert_eq!(chat.messages()[1].text, "second");
    }
}
