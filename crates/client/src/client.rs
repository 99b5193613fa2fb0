// Client facade tying auth, presence, chat state, and visibility together.

use crate::api::{AuthApi, Identity, MessageApi, Notifier};
use crate::chat::{ChatState, InboundOutcome};
use crate::presence::OnlineSet;
use crate::session::{Session, Transport};
use crate::visibility::{VisibilityFilter, VisibilityStore};
use huddle_common::protocol::{
    ServerEvent, EVENT_JOINED, EVENT_LEFT, EVENT_NEW_MESSAGE, EVENT_SNAPSHOT,
};
use huddle_common::types::{Message, UserId};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One user's chat client.
///
/// Owns the realtime session and the derived state it feeds. All remote
/// failures surface through the notifier rather than tearing the client
/// down; the channel stays inactive after a failed login and nothing
/// here retries on its own.
pub struct ChatClient {
    auth: Arc<dyn AuthApi>,
    messages: Arc<dyn MessageApi>,
    notifier: Arc<dyn Notifier>,
    session: Session,
    identity: Option<Identity>,
    contacts: Vec<UserId>,
    online: Arc<Mutex<OnlineSet>>,
    chat: Arc<Mutex<ChatState>>,
    visibility: VisibilityFilter,
    store: VisibilityStore,
}

impl ChatClient {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        messages: Arc<dyn MessageApi>,
        notifier: Arc<dyn Notifier>,
        transport: Arc<dyn Transport>,
        store: VisibilityStore,
    ) -> Self {
        let visibility = match store.load() {
            Ok(filter) => filter,
            Err(err) => {
                warn!(error = %err, "failed to load visibility state, starting fresh");
                VisibilityFilter::default()
            }
        };
        Self {
            auth,
            messages,
            notifier,
            session: Session::new(transport),
            identity: None,
            contacts: Vec::new(),
            online: Arc::new(Mutex::new(OnlineSet::default())),
            chat: Arc::new(Mutex::new(ChatState::default())),
            visibility,
            store,
        }
    }

    /// Verify the stored credentials and, when valid, bring the
    /// realtime channel up. Returns whether a session is now active.
    ///
    /// Handlers attach before the channel activates so the opening
    /// snapshot is never missed.
    pub async fn login(&mut self) -> bool {
        let identity = match self.auth.check_session().await {
            Ok(Some(identity)) => identity,
            Ok(None) => return false,
            Err(err) => {
                self.notifier.notify_error(&format!("session check failed: {err}"));
                return false;
            }
        };

        let notifier = Arc::clone(&self.notifier);
        self.session.on_channel_drop(Box::new(move || {
            notifier.notify_error("realtime channel dropped");
        }));
        self.attach_handlers();
        if let Err(err) = self.session.connect(&identity.user_id).await {
            self.notifier.notify_error(&format!("realtime channel failed: {err}"));
            // Detach what we just attached; the client stays usable
            // for another login attempt.
            self.session.disconnect();
            return false;
        }
        info!(user_id = identity.user_id.as_str(), "session active");
        self.identity = Some(identity);
        true
    }

    fn attach_handlers(&mut self) {
        for event in [EVENT_SNAPSHOT, EVENT_JOINED, EVENT_LEFT] {
            let online = Arc::clone(&self.online);
            self.session.on(event, Box::new(move |event| {
                online.lock().expect("online set lock poisoned").apply(event);
            }));
        }

        let chat = Arc::clone(&self.chat);
        let messages = Arc::clone(&self.messages);
        self.session.on(EVENT_NEW_MESSAGE, Box::new(move |event| {
            let ServerEvent::NewMessage { message } = event else {
                return;
            };
            let outcome = chat
                .lock()
                .expect("chat state lock poisoned")
                .handle_incoming(message.clone());
            if let InboundOutcome::SeenInConversation { message_id } = outcome {
                // Fire-and-forget: a failed acknowledgement leaves the
                // backend behind until the next history fetch.
                let api = Arc::clone(&messages);
                tokio::spawn(async move {
                    if let Err(err) = api.acknowledge_seen(message_id).await {
                        debug!(error = %err, %message_id, "seen acknowledgement failed");
                    }
                });
            }
        }));
    }

    /// Tear down the realtime channel and forget all session-derived
    /// state. The visibility preference is durable and survives.
    pub fn logout(&mut self) {
        self.session.disconnect();
        self.online.lock().expect("online set lock poisoned").reset();
        self.chat.lock().expect("chat state lock poisoned").reset();
        self.identity = None;
        info!("session ended");
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    // --- presence ---

    pub fn online_ids(&self) -> Vec<UserId> {
        self.online.lock().expect("online set lock poisoned").ids()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.lock().expect("online set lock poisoned").contains(user_id)
    }

    // --- conversation ---

    /// Open the conversation with `peer_id`: fetch history, make it the
    /// active selection, and clear that peer's unseen counter.
    pub async fn select_conversation(&mut self, peer_id: UserId) {
        match self.messages.fetch_messages(&peer_id).await {
            Ok(history) => {
                self.chat
                    .lock()
                    .expect("chat state lock poisoned")
                    .select_peer(peer_id, history);
            }
            Err(err) => {
                self.notifier.notify_error(&format!("failed to load conversation: {err}"));
            }
        }
    }

    /// Send to the selected peer. A no-op with a notification when no
    /// conversation is open.
    pub async fn send_message(&mut self, text: &str) {
        let Some(peer_id) = self
            .chat
            .lock()
            .expect("chat state lock poisoned")
            .selected()
            .cloned()
        else {
            self.notifier.notify_error("no conversation selected");
            return;
        };
        match self.messages.send_message(&peer_id, text).await {
            Ok(message) => {
                self.chat
                    .lock()
                    .expect("chat state lock poisoned")
                    .append_sent(message);
            }
            Err(err) => {
                self.notifier.notify_error(&format!("failed to send message: {err}"));
            }
        }
    }

    pub fn conversation(&self) -> Vec<Message> {
        self.chat.lock().expect("chat state lock poisoned").messages().to_vec()
    }

    pub fn unseen_count(&self, user_id: &UserId) -> u64 {
        self.chat.lock().expect("chat state lock poisoned").unseen_count(user_id)
    }

    // --- contacts and visibility ---

    /// Replace the roster. Unseen counters for senders no longer on it
    /// are dropped; they would be unreachable derived state otherwise.
    pub fn set_contacts(&mut self, contacts: Vec<UserId>) {
        self.contacts = contacts;
        self.chat
            .lock()
            .expect("chat state lock poisoned")
            .prune_unseen(&self.contacts);
    }

    pub fn contacts(&self) -> &[UserId] {
        &self.contacts
    }

    /// The contact list after the visibility filter.
    pub fn visible_contacts(&self) -> Vec<UserId> {
        self.visibility.compute_visible(&self.contacts)
    }

    pub fn visibility(&self) -> &VisibilityFilter {
        &self.visibility
    }

    /// Remove a contact and every trace of it: the visibility filter
    /// pins the remaining visible subset (durable), the roster entry,
    /// unseen counter, and the active selection if it pointed at them
    /// all go.
    pub fn remove_contact(&mut self, user_id: &UserId) {
        self.visibility.remove(user_id, &self.contacts);
        self.contacts.retain(|id| id != user_id);
        {
            let mut chat = self.chat.lock().expect("chat state lock poisoned");
            chat.purge_unseen(user_id);
            chat.clear_selection_of(user_id);
        }
        self.persist_visibility();
    }

    fn persist_visibility(&self) {
        if let Err(err) = self.store.save(&self.visibility) {
            self.notifier.notify_error(&format!("failed to save visibility state: {err}"));
        }
    }
}
