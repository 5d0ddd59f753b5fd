//! Server configuration, loaded from an optional JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the gateway treats the `sender` field of CHAT messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SenderPolicy {
    /// Accept whatever sender the client puts on the message.
    #[default]
    Trust,
    /// Only accept CHAT from joined connections, under their joined username.
    Enforce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Outbound queue capacity per connection.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Longest accepted client frame, newline excluded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub sender_policy: SenderPolicy,
}

fn default_addr() -> String {
    "0.0.0.0:8080".into()
}
fn default_send_buffer() -> usize {
    256
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_max_line_bytes() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            send_buffer: default_send_buffer(),
            write_timeout_ms: default_write_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            sender_policy: SenderPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let data = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&data)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"sender_policy": "enforce"}"#).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:8080");
        assert_eq!(cfg.send_buffer, 256);
        assert_eq!(cfg.write_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_line_bytes, 64 * 1024);
        assert_eq!(cfg.sender_policy, SenderPolicy::Enforce);
    }

    #[test]
    fn load_without_path_is_default() {
        let cfg = ServerConfig::load(None).unwrap();
        assert_eq!(cfg.sender_policy, SenderPolicy::Trust);
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("chat-relay-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"addr": "127.0.0.1:9000", "send_buffer": 8}"#).unwrap();
        let cfg = ServerConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.addr, "127.0.0.1:9000");
        assert_eq!(cfg.send_buffer, 8);
    }
}
