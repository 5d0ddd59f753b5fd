use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_relay::config::{SenderPolicy, ServerConfig};
use chat_relay::server::Server;

#[derive(Parser)]
#[command(name = "server", about = "Chat relay server")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP address to listen on
    #[arg(long)]
    addr: Option<String>,

    /// Outbound queue capacity per connection
    #[arg(long)]
    send_buffer: Option<usize>,

    /// Give up on a client whose socket write takes longer than this
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Reject client frames longer than this many bytes
    #[arg(long)]
    max_line_bytes: Option<usize>,

    /// Whether CHAT senders must match the joined username
    #[arg(long, value_enum)]
    sender_policy: Option<SenderPolicy>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut cfg = ServerConfig::load(self.config.as_deref())?;
        if let Some(addr) = self.addr {
            cfg.addr = addr;
        }
        if let Some(n) = self.send_buffer {
            cfg.send_buffer = n;
        }
        if let Some(ms) = self.write_timeout_ms {
            cfg.write_timeout_ms = ms;
        }
        if let Some(n) = self.max_line_bytes {
            cfg.max_line_bytes = n;
        }
        if let Some(policy) = self.sender_policy {
            cfg.sender_policy = policy;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_relay=debug"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cfg = args.into_config()?;
    info!(policy = ?cfg.sender_policy, send_buffer = cfg.send_buffer, "starting");
    let srv = Arc::new(Server::new(cfg));

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
        std::process::exit(0);
    });

    srv.listen_and_serve().await
}
