use thiserror::Error;

use crate::protocol::{Destination, MessageKind};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed frame: not valid UTF-8")]
    InvalidUtf8,

    #[error("frame longer than {max} bytes")]
    LineTooLong { max: usize },

    #[error("unknown destination {0:?}")]
    UnknownDestination(String),

    #[error("{destination} expects a {expected} message, got {got}")]
    WrongKind {
        destination: Destination,
        expected: MessageKind,
        got: MessageKind,
    },

    #[error("sender must not be empty")]
    EmptySender,

    #[error("join the chat before sending messages")]
    NotJoined,

    #[error("sender {claimed:?} does not match joined user {registered:?}")]
    SenderMismatch { claimed: String, registered: String },
}

pub type Result<T> = std::result::Result<T, RelayError>;
