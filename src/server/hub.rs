use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, warn};

use crate::protocol::{ChatMessage, ServerFrame};
use crate::session::ConnectionId;

/// One encoded frame, shared by every subscriber it is queued for.
pub type Outbound = Arc<[u8]>;

/// Write side of a connection as seen by the hub.
#[derive(Clone)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<Outbound>,
    /// Notified when the hub gives up on this client; the connection then closes.
    pub kick: Arc<Notify>,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            kick: Arc::new(Notify::new()),
        }
    }
}

/// Hub fans out every published message to the subscribers of its topic.
///
/// Delivery never waits on a subscriber: a client whose queue is full or
/// closed is dropped from every topic and kicked, and the rest still get the
/// message.
#[derive(Default)]
pub struct Hub {
    topics: RwLock<HashMap<String, HashMap<ConnectionId, ClientHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, topic: &str, handle: ClientHandle) {
        let mut topics = self.topics.write().await;
        let subs = topics.entry(topic.to_string()).or_default();
        debug!(conn = %handle.id, topic, total = subs.len() + 1, "+subscriber");
        subs.insert(handle.id, handle);
    }

    /// Removes `id` from every topic. Returns how many subscriptions it had.
    pub async fn unsubscribe_all(&self, id: ConnectionId) -> usize {
        let mut topics = self.topics.write().await;
        remove_everywhere(&mut topics, id)
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, HashMap::len)
    }

    /// Queues `msg` for every subscriber of `topic` and returns how many took it.
    pub async fn publish(&self, topic: &str, msg: &ChatMessage) -> usize {
        let data: Outbound = match ServerFrame::message(topic, msg.clone()).encode_line() {
            Ok(data) => data.into(),
            Err(e) => {
                warn!(topic, error = %e, "failed to encode message");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut to_remove = Vec::new();
        {
            let topics = self.topics.read().await;
            let Some(subs) = topics.get(topic) else {
                debug!(topic, kind = %msg.kind, "no subscribers");
                return 0;
            };
            for handle in subs.values() {
                match handle.tx.try_send(Arc::clone(&data)) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(conn = %handle.id, topic, error = %e, "dropping subscriber");
                        to_remove.push(handle.clone());
                    }
                }
            }
        }
        debug!(topic, kind = %msg.kind, sender = %msg.sender, recipients = delivered, "published");

        if !to_remove.is_empty() {
            let mut topics = self.topics.write().await;
            for handle in to_remove {
                remove_everywhere(&mut topics, handle.id);
                handle.kick.notify_one();
            }
        }
        delivered
    }
}

fn remove_everywhere(
    topics: &mut HashMap<String, HashMap<ConnectionId, ClientHandle>>,
    id: ConnectionId,
) -> usize {
    let mut removed = 0;
    topics.retain(|_, subs| {
        if subs.remove(&id).is_some() {
            removed += 1;
        }
        !subs.is_empty()
    });
    removed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{JOIN_TOPIC, PUBLIC_TOPIC};

    fn make_client(n: u64, cap: usize) -> (ClientHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(cap);
        (ClientHandle::new(ConnectionId::new(n), tx), rx)
    }

    fn decode(data: &Outbound) -> ServerFrame {
        serde_json::from_slice(data).unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_only_topic_subscribers() {
        let hub = Hub::new();
        let (c1, mut rx1) = make_client(1, 8);
        let (c2, mut rx2) = make_client(2, 8);
        hub.subscribe(PUBLIC_TOPIC, c1).await;
        hub.subscribe(JOIN_TOPIC, c2).await;

        let msg = ChatMessage::chat("alice", "hi");
        assert_eq!(hub.publish(PUBLIC_TOPIC, &msg).await, 1);

        assert_eq!(decode(&rx1.try_recv().unwrap()), ServerFrame::message(PUBLIC_TOPIC, msg));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = Hub::new();
        assert_eq!(hub.publish(PUBLIC_TOPIC, &ChatMessage::leave("ghost")).await, 0);
    }

    #[tokio::test]
    async fn single_publisher_order_is_kept() {
        let hub = Hub::new();
        let (c1, mut rx1) = make_client(1, 16);
        hub.subscribe(PUBLIC_TOPIC, c1).await;

        for i in 0..10 {
            hub.publish(PUBLIC_TOPIC, &ChatMessage::chat("alice", i.to_string())).await;
        }
        for i in 0..10 {
            match decode(&rx1.try_recv().unwrap()) {
                ServerFrame::Message { payload, .. } => assert_eq!(payload.content, Some(i.to_string())),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn full_subscriber_is_evicted_and_kicked() {
        let hub = Hub::new();
        let (slow, _slow_rx) = make_client(1, 1);
        let (fast, mut fast_rx) = make_client(2, 8);
        let kick = slow.kick.clone();
        hub.subscribe(PUBLIC_TOPIC, slow.clone()).await;
        hub.subscribe(JOIN_TOPIC, slow).await;
        hub.subscribe(PUBLIC_TOPIC, fast).await;

        assert_eq!(hub.publish(PUBLIC_TOPIC, &ChatMessage::chat("a", "1")).await, 2);
        // slow's queue is now full
        assert_eq!(hub.publish(PUBLIC_TOPIC, &ChatMessage::chat("a", "2")).await, 1);

        assert!(tokio::time::timeout(Duration::from_secs(1), kick.notified()).await.is_ok());
        assert_eq!(hub.subscriber_count(PUBLIC_TOPIC).await, 1);
        assert_eq!(hub.subscriber_count(JOIN_TOPIC).await, 0);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_block_others() {
        let hub = Hub::new();
        let (gone, gone_rx) = make_client(1, 8);
        let (live, mut live_rx) = make_client(2, 8);
        hub.subscribe(PUBLIC_TOPIC, gone).await;
        hub.subscribe(PUBLIC_TOPIC, live).await;
        drop(gone_rx);

        assert_eq!(hub.publish(PUBLIC_TOPIC, &ChatMessage::leave("x")).await, 1);
        assert!(live_rx.try_recv().is_ok());
        assert_eq!(hub.subscriber_count(PUBLIC_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_every_topic() {
        let hub = Hub::new();
        let (c1, _rx) = make_client(1, 8);
        hub.subscribe(PUBLIC_TOPIC, c1.clone()).await;
        hub.subscribe(JOIN_TOPIC, c1).await;

        assert_eq!(hub.unsubscribe_all(ConnectionId::new(1)).await, 2);
        assert_eq!(hub.unsubscribe_all(ConnectionId::new(1)).await, 0);
        assert_eq!(hub.subscriber_count(PUBLIC_TOPIC).await, 0);
    }
}
