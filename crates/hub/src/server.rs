//! Broadcast hub.
//!
//! Listens on a TCP port, upgrades every connection to WebSocket, and fans
//! messages out to all connected clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

use hotpatch_protocol::constants::{CHUNK_SIZE, DEFAULT_HOST, DEFAULT_PORT, WS_MAX_MESSAGE_SIZE};
use hotpatch_protocol::{Message, ProtocolError, encode, split};

use crate::HubError;
use crate::connection::{self, ClientConnection, ConnectionInfo};
use crate::qualify::personalize;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Largest `contents` length, in characters, sent as one frame.
    pub chunk_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// The live-update hub.
pub struct BroadcastHub {
    config: HubConfig,
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the hub is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of tracked connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Snapshot of the tracked connections.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .values()
            .map(ClientConnection::info)
            .collect()
    }

    /// Stops listening and closes every connection.
    ///
    /// Safe to call before [`run`](Self::run), after it, and more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        let drained: Vec<ClientConnection> = {
            let mut conns = self.connections.write().await;
            conns.drain().map(|(_, c)| c).collect()
        };
        for conn in &drained {
            conn.close();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed client connections");
        }
    }

    /// Runs the accept loop until [`close`](Self::close) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("hub listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("hub shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let hub = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = hub.handle_connection(stream, peer_addr).await {
                                    error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection to WebSocket and starts tracking it.
    async fn handle_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), HubError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        info!(%peer_addr, "client connected");

        connection::spawn_connection(ws_stream, peer_addr, self).await;
        Ok(())
    }

    /// Sends `message` to every connected client.
    ///
    /// Each client gets the message with its resource URL qualified against
    /// that client's base URL, split into chunks when the contents are
    /// large. All frames for one client are queued as a single batch.
    /// Returns the number of clients the message was queued to.
    pub async fn broadcast(&self, message: &Message) -> usize {
        let targets: Vec<(Uuid, connection::Sender, Option<Url>)> = {
            let conns = self.connections.read().await;
            conns
                .values()
                .filter(|c| c.sender.is_connected())
                .map(|c| (c.id, c.sender.clone(), c.base_url.get().cloned()))
                .collect()
        };

        if targets.is_empty() {
            debug!(kind = message.kind(), "no clients connected");
            return 0;
        }

        // Clients sharing a base URL share the encoded frames.
        let mut encoded: HashMap<Option<Url>, Vec<String>> = HashMap::new();
        let mut delivered = 0;

        for (id, sender, base_url) in targets {
            if !encoded.contains_key(&base_url) {
                match self.encode_for(message, base_url.as_ref()) {
                    Ok(frames) => {
                        encoded.insert(base_url.clone(), frames);
                    }
                    Err(e) => {
                        error!(%id, "failed to encode broadcast: {e}");
                        continue;
                    }
                }
            }
            let Some(frames) = encoded.get(&base_url) else {
                continue;
            };

            let batch = frames
                .iter()
                .map(|f| WsMessage::Text(f.clone().into()))
                .collect();
            match sender.send_batch(batch) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(%id, "skipping connection: {e}"),
            }
        }

        debug!(
            kind = message.kind(),
            url = message.resource_url().unwrap_or_default(),
            delivered,
            "broadcast"
        );
        delivered
    }

    fn encode_for(&self, message: &Message, base: Option<&Url>) -> Result<Vec<String>, ProtocolError> {
        split(personalize(message, base), self.config.chunk_size)
            .iter()
            .map(encode)
            .collect()
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub(crate) async fn register(&self, conn: ClientConnection) {
        if self.cancel.is_cancelled() {
            conn.close();
            return;
        }
        let mut conns = self.connections.write().await;
        debug!(id = %conn.id, total = conns.len() + 1, "tracking connection");
        conns.insert(conn.id, conn);
    }

    /// Stops tracking a connection. Unknown ids are ignored.
    pub(crate) async fn unregister(&self, id: Uuid) {
        if let Some(conn) = self.connections.write().await.remove(&id) {
            conn.close();
            debug!(%id, "connection removed");
        }
    }
}
