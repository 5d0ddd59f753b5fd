use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Topic that carries CHAT and LEAVE messages.
pub const PUBLIC_TOPIC: &str = "public";
/// Topic that carries JOIN messages.
pub const JOIN_TOPIC: &str = "chat";
/// Every topic a connection is implicitly subscribed to.
pub const TOPICS: [&str; 2] = [PUBLIC_TOPIC, JOIN_TOPIC];

/// Prefix clients may put in front of a destination (`/app/chat.addUser`).
const APP_PREFIX: &str = "/app/";

/// MessageKind identifies what a chat event means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Join,
    Leave,
    Chat,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageKind::Join => "JOIN",
            MessageKind::Leave => "LEAVE",
            MessageKind::Chat => "CHAT",
        })
    }
}

/// The chat event exchanged between clients and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "type")]
    pub kind: MessageKind,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn join(sender: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Join,
            sender: sender.into(),
            content: None,
        }
    }

    pub fn leave(sender: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Leave,
            sender: sender.into(),
            content: None,
        }
    }

    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Chat,
            sender: sender.into(),
            content: Some(content.into()),
        }
    }
}

/// Server-side handlers a client frame can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    SendMessage,
    AddUser,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Destination::SendMessage => "chat.sendMessage",
            Destination::AddUser => "chat.addUser",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(APP_PREFIX).unwrap_or(raw) {
            "chat.sendMessage" => Ok(Destination::SendMessage),
            "chat.addUser" => Ok(Destination::AddUser),
            _ => Err(RelayError::UnknownDestination(raw.to_string())),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every client frame is a single JSON object followed by a newline character (\n).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub destination: String,
    pub payload: serde_json::Value,
}

impl ClientFrame {
    pub fn new(destination: Destination, msg: &ChatMessage) -> Result<Self> {
        Ok(Self {
            destination: destination.as_str().to_string(),
            payload: serde_json::to_value(msg)?,
        })
    }

    /// Decodes one line read off the wire into a routed request.
    pub fn decode(line: &str) -> Result<(Destination, ChatMessage)> {
        let frame: ClientFrame = serde_json::from_str(line)?;
        let destination = Destination::parse(&frame.destination)?;
        let msg = serde_json::from_value(frame.payload)?;
        Ok((destination, msg))
    }

    pub fn encode_line(&self) -> Result<Vec<u8>> {
        encode_line(self)
    }
}

/// Frames pushed from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Message { topic: String, payload: ChatMessage },
    Error { message: String },
}

impl ServerFrame {
    pub fn message(topic: &str, payload: ChatMessage) -> Self {
        ServerFrame::Message {
            topic: topic.to_string(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn encode_line(&self) -> Result<Vec<u8>> {
        encode_line(self)
    }
}

fn encode_line(v: &impl Serialize) -> Result<Vec<u8>> {
    let mut data = serde_json::to_vec(v)?;
    data.push(b'\n');
    Ok(data)
}
