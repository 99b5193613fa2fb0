// Realtime channel lifecycle and event dispatch.

use async_trait::async_trait;
use huddle_common::protocol::{ServerEvent, SESSION_EVENTS};
use huddle_common::types::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type Handler = Box<dyn FnMut(&ServerEvent) + Send>;

type DropCallback = Box<dyn FnOnce() + Send>;

/// Named event handlers, keyed by wire event name.
///
/// At most one handler per name; attaching again replaces. Detaching
/// uses the exact names that were attached, so a teardown can never
/// leave a stale handler behind under a name it did not know about.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl HandlerRegistry {
    pub fn on(&mut self, event: &'static str, handler: Handler) {
        self.handlers.insert(event, handler);
    }

    pub fn off(&mut self, event: &'static str) {
        self.handlers.remove(event);
    }

    /// Route one event to its handler. Returns whether a handler ran.
    pub fn dispatch(&mut self, event: &ServerEvent) -> bool {
        match self.handlers.get_mut(event.event_name()) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A live stream of decoded server events plus the task feeding it.
pub struct EventSource {
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
    pub reader: Option<JoinHandle<()>>,
}

/// Seam between the session and the wire. Production uses a websocket;
/// tests hand the session a channel directly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn activate(&self, user_id: &UserId) -> anyhow::Result<EventSource>;
}

struct ActiveChannel {
    alive: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

/// Owns the single realtime channel for this process.
///
/// Handlers attach before the channel activates, so the first event off
/// the wire already has somewhere to go. `connect` while a channel is
/// active is a no-op; there is never more than one live channel. A
/// channel that dies underneath us (transport dropped, server gone)
/// flips the session to inactive, detaches the handlers, and fires the
/// drop callback once; nothing here reconnects on its own.
pub struct Session {
    transport: Arc<dyn Transport>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    on_drop: Arc<Mutex<Option<DropCallback>>>,
    active: Option<ActiveChannel>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            on_drop: Arc::new(Mutex::new(None)),
            active: None,
        }
    }

    pub fn on(&self, event: &'static str, handler: Handler) {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .on(event, handler);
    }

    /// Called once if the active channel dies without `disconnect`.
    /// A deliberate `disconnect` clears it unfired.
    pub fn on_channel_drop(&self, callback: DropCallback) {
        *self.on_drop.lock().expect("drop callback lock poisoned") = Some(callback);
    }

    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(|channel| channel.alive.load(Ordering::SeqCst))
    }

    /// Activate the channel for `user_id` and start pumping events into
    /// the attached handlers, one at a time in arrival order.
    pub async fn connect(&mut self, user_id: &UserId) -> anyhow::Result<()> {
        if self.is_connected() {
            debug!(user_id = user_id.as_str(), "channel already active, ignoring connect");
            return Ok(());
        }
        self.active = None;

        let source = self.transport.activate(user_id).await?;
        let alive = Arc::new(AtomicBool::new(true));
        let handlers = Arc::clone(&self.handlers);
        let on_drop = Arc::clone(&self.on_drop);
        let pump_alive = Arc::clone(&alive);
        let mut events = source.events;
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handlers
                    .lock()
                    .expect("handler registry lock poisoned")
                    .dispatch(&event);
            }
            // The transport side is gone. Mark the channel dead and
            // detach before reporting, so no late event finds a handler.
            warn!("realtime channel dropped");
            pump_alive.store(false, Ordering::SeqCst);
            {
                let mut handlers = handlers.lock().expect("handler registry lock poisoned");
                for event in SESSION_EVENTS {
                    handlers.off(event);
                }
            }
            if let Some(callback) = on_drop.lock().expect("drop callback lock poisoned").take() {
                callback();
            }
        });
        self.active = Some(ActiveChannel { alive, pump, reader: source.reader });
        Ok(())
    }

    /// Detach the session's handlers, then tear the channel down.
    ///
    /// The order matters: once `disconnect` returns, no event from the
    /// closing channel can reach a handler, even if the channel takes a
    /// moment to die. The drop callback is cleared without firing; a
    /// deliberate teardown is not a transport failure.
    pub fn disconnect(&mut self) {
        self.on_drop.lock().expect("drop callback lock poisoned").take();
        {
            let mut handlers = self.handlers.lock().expect("handler registry lock poisoned");
            for event in SESSION_EVENTS {
                handlers.off(event);
            }
        }
        if let Some(active) = self.active.take() {
            active.pump.abort();
            if let Some(reader) = active.reader {
                reader.abort();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_common::protocol::EVENT_SNAPSHOT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    /// Transport backed by a plain channel the test writes into.
    struct ChannelTransport {
        source: AsyncMutex<Option<EventSource>>,
    }

    impl ChannelTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<ServerEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                source: AsyncMutex::new(Some(EventSource { events: rx, reader: None })),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn activate(&self, _user_id: &UserId) -> anyhow::Result<EventSource> {
            self.source
                .lock()
                .await
                .take()
                .ok_or_else(|| anyhow::anyhow!("channel already taken"))
        }
    }

    fn snapshot() -> ServerEvent {
        ServerEvent::Snapshot { online_ids: vec![UserId::new("a")] }
    }

    #[tokio::test]
    async fn events_reach_handler_attached_before_connect() {
        let (transport, tx) = ChannelTransport::new();
        let mut session = Session::new(transport);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        session.on(EVENT_SNAPSHOT, Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Queued before the pump starts; must still be dispatched.
        tx.send(snapshot()).unwrap();
        session.connect(&UserId::new("me")).await.unwrap();
        tx.send(snapshot()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_while_active_is_a_noop() {
        let (transport, _tx) = ChannelTransport::new();
        let mut session = Session::new(transport);

        session.connect(&UserId::new("me")).await.unwrap();
        assert!(session.is_connected());
        // Would fail if it tried to take the channel a second time.
        session.connect(&UserId::new("me")).await.unwrap();
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn disconnect_detaches_handlers_before_teardown() {
        let (transport, tx) = ChannelTransport::new();
        let mut session = Session::new(transport);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        session.on(EVENT_SNAPSHOT, Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.connect(&UserId::new("me")).await.unwrap();
        tx.send(snapshot()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        session.disconnect();
        assert!(!session.is_connected());

        // Anything still in flight finds no handler.
        let _ = tx.send(snapshot());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_channel_flips_inactive_and_fires_callback() {
        let (transport, tx) = ChannelTransport::new();
        let mut session = Session::new(transport);

        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        session.on_channel_drop(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.connect(&UserId::new("me")).await.unwrap();
        assert!(session.is_connected());

        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!session.is_connected());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deliberate_disconnect_never_fires_the_drop_callback() {
        let (transport, tx) = ChannelTransport::new();
        let mut session = Session::new(transport);

        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        session.on_channel_drop(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.connect(&UserId::new("me")).await.unwrap();
        session.disconnect();
        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_without_a_handler_are_dropped() {
        let mut registry = HandlerRegistry::default();
        assert!(!registry.dispatch(&snapshot()));

        let hit = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hit);
        registry.on(EVENT_SNAPSHOT, Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(registry.dispatch(&snapshot()));
        registry.off(EVENT_SNAPSHOT);
        assert!(!registry.dispatch(&snapshot()));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }
}
