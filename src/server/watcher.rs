use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::{ChatMessage, PUBLIC_TOPIC};
use crate::session::ConnectionId;

use super::hub::Hub;
use super::SharedRegistry;

/// Raised by the transport once per connection, whatever made it close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClosed(pub ConnectionId);

/// Fires a connection's [`ConnectionClosed`] event at most once.
///
/// Dropping the notifier fires it too, so a connection task that unwinds still
/// produces its LEAVE.
pub struct CloseNotifier {
    id: ConnectionId,
    // Unbounded: `Drop` cannot wait for capacity.
    tx: mpsc::UnboundedSender<ConnectionClosed>,
    fired: AtomicBool,
}

impl CloseNotifier {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<ConnectionClosed>) -> Self {
        Self {
            id,
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// Returns false if the event was already raised.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.tx.send(ConnectionClosed(self.id)).is_err() {
            debug!(conn = %self.id, "disconnect watcher is gone");
        }
        true
    }
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Announces a LEAVE for every joined connection that closes.
pub struct DisconnectWatcher {
    registry: SharedRegistry,
    hub: Arc<Hub>,
}

impl DisconnectWatcher {
    pub fn new(registry: SharedRegistry, hub: Arc<Hub>) -> Self {
        Self { registry, hub }
    }

    /// Publishes `{LEAVE, username}` on the public topic and then drops the
    /// session. A connection that never joined produces nothing.
    pub async fn on_closed(&self, id: ConnectionId) -> Option<ChatMessage> {
        let mut registry = self.registry.lock().await;
        let Some(session) = registry.get(id) else {
            debug!(conn = %id, "closed before joining");
            return None;
        };
        let msg = ChatMessage::leave(session.username.clone());

        self.hub.publish(PUBLIC_TOPIC, &msg).await;
        registry.remove(id);
        info!(conn = %id, username = %msg.sender, online = registry.len(), "user left");
        Some(msg)
    }

    /// run must be spawned as a tokio task. It ends once every sender is dropped.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ConnectionClosed>) {
        while let Some(ConnectionClosed(id)) = rx.recv().await {
            self.on_closed(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;
    use crate::protocol::{MessageKind, ServerFrame};
    use crate::server::hub::{ClientHandle, Outbound};
    use crate::session::SessionRegistry;

    async fn setup() -> (DisconnectWatcher, SharedRegistry, mpsc::Receiver<Outbound>) {
        let registry: SharedRegistry = Arc::new(Mutex::new(SessionRegistry::new()));
        let hub = Arc::new(Hub::new());
        let (tx, rx) = mpsc::channel(16);
        hub.subscribe(PUBLIC_TOPIC, ClientHandle::new(ConnectionId::new(100), tx)).await;
        (DisconnectWatcher::new(registry.clone(), hub), registry, rx)
    }

    fn frame(data: Outbound) -> ServerFrame {
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn joined_connection_leaves_once() {
        let (watcher, registry, mut rx) = setup().await;
        let c1 = ConnectionId::new(1);
        registry.lock().await.put(c1, "bob");

        assert_eq!(watcher.on_closed(c1).await, Some(ChatMessage::leave("bob")));
        assert_eq!(frame(rx.try_recv().unwrap()), ServerFrame::message(PUBLIC_TOPIC, ChatMessage::leave("bob")));
        assert!(registry.lock().await.get(c1).is_none());

        assert_eq!(watcher.on_closed(c1).await, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn never_joined_is_silent() {
        let (watcher, registry, mut rx) = setup().await;
        assert_eq!(watcher.on_closed(ConnectionId::new(9)).await, None);
        assert!(rx.try_recv().is_err());
        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn same_name_sessions_leave_independently() {
        let (watcher, registry, mut rx) = setup().await;
        let (c1, c2) = (ConnectionId::new(1), ConnectionId::new(2));
        registry.lock().await.put(c1, "sam");
        registry.lock().await.put(c2, "sam");

        watcher.on_closed(c1).await;
        assert_eq!(registry.lock().await.get(c2).unwrap().username, "sam");
        watcher.on_closed(c2).await;

        for _ in 0..2 {
            match frame(rx.try_recv().unwrap()) {
                ServerFrame::Message { payload, .. } => {
                    assert_eq!(payload.kind, MessageKind::Leave);
                    assert_eq!(payload.sender, "sam");
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert!(rx.try_recv().is_err());
        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn notifier_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = CloseNotifier::new(ConnectionId::new(3), tx);
        assert!(notifier.fire());
        assert!(!notifier.fire());
        drop(notifier);

        assert_eq!(rx.recv().await, Some(ConnectionClosed(ConnectionId::new(3))));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_notifier_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(CloseNotifier::new(ConnectionId::new(4), tx));
        assert_eq!(rx.recv().await, Some(ConnectionClosed(ConnectionId::new(4))));
    }

    #[tokio::test]
    async fn run_consumes_close_events() {
        let (watcher, registry, mut rx) = setup().await;
        let c1 = ConnectionId::new(1);
        registry.lock().await.put(c1, "bob");

        let (tx, close_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(watcher.run(close_rx));
        tx.send(ConnectionClosed(c1)).unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(registry.lock().await.is_empty());
    }
}
