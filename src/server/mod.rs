pub mod gateway;
pub mod hub;
pub mod lines;
pub mod watcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::protocol::{ClientFrame, ServerFrame, TOPICS};
use crate::session::{ConnectionId, SessionRegistry};
use gateway::Gateway;
use hub::{ClientHandle, Hub, Outbound};
use lines::LineReader;
use watcher::{CloseNotifier, ConnectionClosed, DisconnectWatcher};

pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ─── Server ─────────────────────────────────────────────────────────────────

pub struct Server {
    config: ServerConfig,
    registry: SharedRegistry,
    hub: Arc<Hub>,
    gateway: Gateway,
    closed_tx: mpsc::UnboundedSender<ConnectionClosed>,
    conn_counter: AtomicU64,
}

impl Server {
    /// Must be called from within a tokio runtime: it spawns the disconnect watcher.
    pub fn new(config: ServerConfig) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(SessionRegistry::new()));
        let hub = Arc::new(Hub::new());

        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let watcher = DisconnectWatcher::new(registry.clone(), hub.clone());
        tokio::spawn(watcher.run(closed_rx));

        let gateway = Gateway::new(registry.clone(), hub.clone(), config.sender_policy);

        Self {
            config,
            registry,
            hub,
            gateway,
            closed_tx,
            conn_counter: AtomicU64::new(0),
        }
    }

    /// Usernames of every joined connection, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        self.registry.lock().await.usernames()
    }

    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "listening");

        loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    debug!(%peer, "accepted");
                    let srv = self.clone();
                    tokio::spawn(srv.serve_conn(conn));
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn serve_conn(self: Arc<Self>, conn: TcpStream) {
        let id = ConnectionId::new(self.conn_counter.fetch_add(1, Ordering::Relaxed));
        let notifier = CloseNotifier::new(id, self.closed_tx.clone());
        let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(self.config.send_buffer.max(1));
        let client = ClientHandle::new(id, send_tx);
        let kick = client.kick.clone();

        for topic in TOPICS {
            self.hub.subscribe(topic, client.clone()).await;
        }

        let (reader, mut writer) = conn.into_split();

        // Write pump
        let write_timeout = self.config.write_timeout();
        let write_kick = kick.clone();
        tokio::spawn(async move {
            while let Some(data) = send_rx.recv().await {
                match tokio::time::timeout(write_timeout, writer.write_all(&data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(conn = %id, error = %e, "write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(conn = %id, timeout_ms = write_timeout.as_millis() as u64, "write timed out");
                        break;
                    }
                }
            }
            write_kick.notify_one();
            debug!(conn = %id, "write pump ended");
        });

        info!(conn = %id, "connected");

        // Read pump (runs in this task)
        let mut lines = LineReader::new(reader, self.config.max_line_bytes);
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(Ok(line))) => self.handle_line(&client, &line).await,
                    Ok(Some(Err(e))) => reject(&client, &e),
                    Ok(None) => {
                        debug!(conn = %id, "closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!(conn = %id, error = %e, "read failed");
                        break;
                    }
                },
                _ = kick.notified() => {
                    debug!(conn = %id, "closing from server side");
                    break;
                }
            }
        }

        // Cleanup
        self.hub.unsubscribe_all(id).await;
        drop(client);
        notifier.fire();
        info!(conn = %id, "connection closed");
    }

    async fn handle_line(&self, client: &ClientHandle, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let result = match ClientFrame::decode(line) {
            Ok((destination, msg)) => self.gateway.dispatch(destination, msg, client.id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            reject(client, &e);
        }
    }
}

/// Reports a rejected frame back to its sender; the connection stays open.
fn reject(client: &ClientHandle, err: &RelayError) {
    warn!(conn = %client.id, error = %err, "rejected frame");
    if let Ok(data) = ServerFrame::error(err.to_string()).encode_line() {
        client.tx.try_send(data.into()).ok();
    }
}
