//! Real-time chat relay: clients join under a username, chat on a shared
//! topic, and everyone hears about joins and leaves, including connections
//! that drop without saying goodbye.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{RelayError, Result};
