//! Client connections: read/write pumps, keepalive pings, batched sends.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;
use uuid::Uuid;

use hotpatch_protocol::constants::{SEND_BUFFER_SIZE, WS_PING_PERIOD};
use hotpatch_protocol::{Message, decode};

use crate::server::BroadcastHub;

/// Handle for queueing frames to one client.
///
/// Each queued item is a batch of frames written back to back, so the
/// frames of one broadcast are never interleaved with another.
#[derive(Clone)]
pub(crate) struct Sender {
    tx: mpsc::Sender<Vec<WsMessage>>,
}

impl Sender {
    /// Queues a batch of frames without waiting.
    pub(crate) fn send_batch(&self, batch: Vec<WsMessage>) -> Result<(), SendError> {
        self.tx.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("send buffer full, dropping batch");
                SendError
            }
            mpsc::error::TrySendError::Closed(_) => SendError,
        })
    }

    /// Returns `true` if the send channel is still open.
    pub(crate) fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub(crate) struct SendError;

/// A tracked client connection.
pub(crate) struct ClientConnection {
    pub(crate) id: Uuid,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) sender: Sender,
    /// Written once by this connection's read pump.
    pub(crate) base_url: Arc<OnceLock<Url>>,
    pub(crate) cancel: CancellationToken,
}

impl ClientConnection {
    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            base_url: self.base_url.get().map(|u| u.to_string()),
        }
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

/// Snapshot of a connection for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer_addr: SocketAddr,
    pub base_url: Option<String>,
}

/// Registers a freshly upgraded WebSocket with the hub and starts its pumps.
///
/// The connection is tracked before its read pump starts, so the pump's
/// unregister on exit can never run ahead of the insert.
pub(crate) async fn spawn_connection<S>(ws_stream: S, peer_addr: SocketAddr, hub: Arc<BroadcastHub>)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<WsMessage>>(SEND_BUFFER_SIZE);
    let id = Uuid::new_v4();
    let cancel = hub.child_token();
    let base_url = Arc::new(OnceLock::new());
    let sender = Sender { tx };

    hub.register(ClientConnection {
        id,
        peer_addr,
        sender: sender.clone(),
        base_url: Arc::clone(&base_url),
        cancel: cancel.clone(),
    })
    .await;

    let (ws_sink, ws_stream) = ws_stream.split();
    let span = info_span!("hub.connection", %peer_addr, %id);

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()).instrument(span.clone()));

    tokio::spawn(
        async move {
            read_pump(ws_stream, &sender, &base_url, cancel.clone()).await;
            // When read pump exits, cancel the write pump too.
            cancel.cancel();
            hub.unregister(id).await;
            info!("client disconnected");
        }
        .instrument(span),
    );
}

/// Write pump: drains queued batches and sends WS pings.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Vec<WsMessage>>,
    cancel: CancellationToken,
) where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping_interval.tick().await;

    'pump: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            batch = rx.recv() => {
                let Some(batch) = batch else { break }; // Channel closed.
                for frame in batch {
                    if let Err(e) = sink.feed(frame).await {
                        error!("write pump send error: {e}");
                        break 'pump;
                    }
                }
                if let Err(e) = sink.flush().await {
                    error!("write pump flush error: {e}");
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: records the client's base URL and ignores everything else.
async fn read_pump<S>(
    mut stream: S,
    sender: &Sender,
    base_url: &OnceLock<Url>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => handle_text(&text, base_url),
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send_batch(vec![WsMessage::Pong(data)]);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("received close frame");
                        break;
                    }
                    Some(Ok(_)) => {} // Binary, pong and raw frames are ignored.
                    Some(Err(e)) => {
                        debug!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Handles one inbound text frame.
fn handle_text(text: &str, base_url: &OnceLock<Url>) {
    let message = match decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("dropping malformed client frame: {e}");
            return;
        }
    };

    match message {
        Message::BaseUrl { url: Some(url) } => store_base_url(base_url, &url),
        Message::BaseUrl { url: None } => debug!("base URL frame without url"),
        other => debug!(kind = other.kind(), "ignoring client message"),
    }
}

/// Stores the first valid base URL; later handshakes cannot change it.
fn store_base_url(slot: &OnceLock<Url>, raw: &str) {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(e) => {
            warn!(url = raw, "ignoring invalid base URL: {e}");
            return;
        }
    };

    match slot.get() {
        Some(existing) if *existing == parsed => debug!(url = raw, "base URL repeated"),
        Some(existing) => warn!(
            current = %existing,
            rejected = raw,
            "base URL already set for this connection"
        ),
        None => {
            let _ = slot.set(parsed);
            info!(url = raw, "client base URL set");
        }
    }
}
