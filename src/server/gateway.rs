use std::sync::Arc;

use tracing::info;

use crate::config::SenderPolicy;
use crate::error::{RelayError, Result};
use crate::protocol::{ChatMessage, Destination, MessageKind, JOIN_TOPIC, PUBLIC_TOPIC};
use crate::session::ConnectionId;

use super::hub::Hub;
use super::SharedRegistry;

/// Turns decoded client requests into registry updates and broadcasts.
pub struct Gateway {
    registry: SharedRegistry,
    hub: Arc<Hub>,
    policy: SenderPolicy,
}

impl Gateway {
    pub fn new(registry: SharedRegistry, hub: Arc<Hub>, policy: SenderPolicy) -> Self {
        Self {
            registry,
            hub,
            policy,
        }
    }

    pub async fn dispatch(&self, destination: Destination, msg: ChatMessage, id: ConnectionId) -> Result<()> {
        match destination {
            Destination::SendMessage => self.handle_send(msg, id).await,
            Destination::AddUser => self.handle_add_user(msg, id).await,
        }
    }

    /// Re-broadcasts a CHAT message on the public topic, unchanged.
    pub async fn handle_send(&self, msg: ChatMessage, id: ConnectionId) -> Result<()> {
        expect_kind(Destination::SendMessage, MessageKind::Chat, &msg)?;

        if self.policy == SenderPolicy::Enforce {
            let registry = self.registry.lock().await;
            match registry.get(id) {
                None => return Err(RelayError::NotJoined),
                Some(session) if session.username != msg.sender => {
                    return Err(RelayError::SenderMismatch {
                        claimed: msg.sender,
                        registered: session.username.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        info!(conn = %id, sender = %msg.sender, "message received");
        self.hub.publish(PUBLIC_TOPIC, &msg).await;
        Ok(())
    }

    /// Records the connection's username and announces the JOIN on the join topic.
    /// Joining again on the same connection replaces the username.
    pub async fn handle_add_user(&self, msg: ChatMessage, id: ConnectionId) -> Result<()> {
        expect_kind(Destination::AddUser, MessageKind::Join, &msg)?;
        if msg.sender.trim().is_empty() {
            return Err(RelayError::EmptySender);
        }

        let (replaced, online) = {
            let mut registry = self.registry.lock().await;
            let replaced = registry.put(id, msg.sender.clone());
            (replaced, registry.len())
        };
        match replaced {
            Some(old) => info!(conn = %id, from = %old, to = %msg.sender, "user renamed"),
            None => info!(conn = %id, username = %msg.sender, online, "user joined"),
        }

        self.hub.publish(JOIN_TOPIC, &msg).await;
        Ok(())
    }
}

fn expect_kind(destination: Destination, expected: MessageKind, msg: &ChatMessage) -> Result<()> {
    if msg.kind == expected {
        Ok(())
    } else {
        Err(RelayError::WrongKind {
            destination,
            expected,
            got: msg.kind,
        })
    }
}
