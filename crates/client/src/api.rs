// External collaborator interfaces.
//
// Credential verification and message persistence live in separate
// services; the client only depends on these seams. Tests substitute
// in-memory fakes.

use async_trait::async_trait;
use huddle_common::types::{Message, UserId};
use uuid::Uuid;

/// An authenticated identity returned by the session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
}

/// Authentication collaborator.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Returns the current identity, or `None` when unauthenticated.
    async fn check_session(&self) -> anyhow::Result<Option<Identity>>;
}

/// Message-storage collaborator.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(&self, recipient_id: &UserId, text: &str) -> anyhow::Result<Message>;

    async fn fetch_messages(&self, peer_id: &UserId) -> anyhow::Result<Vec<Message>>;

    /// Mark a message seen on the backend. Callers treat this as
    /// fire-and-forget: failures are not retried and leave a transient
    /// client-seen/server-seen inconsistency until the next fetch.
    async fn acknowledge_seen(&self, message_id: Uuid) -> anyhow::Result<()>;
}

/// Sink for non-fatal, user-visible error notifications.
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

/// Notifier that only logs, for headless use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_error(&self, message: &str) {
        tracing::warn!(message, "user-visible error");
    }
}
