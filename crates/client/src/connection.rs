//! Reconnecting WebSocket transport to the hub.
//!
//! One driver task per [`ConnectionManager`] owns the socket and walks an
//! explicit state machine: connect, pump frames until the socket drops,
//! then either wait out a linear backoff and try again or give up once the
//! retry budget is spent. Attempts are strictly sequential.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hotpatch_protocol::constants::{DEFAULT_HOST, DEFAULT_PORT, WS_MAX_MESSAGE_SIZE};
use hotpatch_protocol::{Message, Reassembler, decode, encode};

use crate::error::ClientError;
use crate::retry::{RetryBudget, RetryDecision, RetryPolicy};

const OUTBOUND_BUFFER: usize = 64;

type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(ClientError) + Send + Sync>;
type RetryHandler = Arc<dyn Fn(Duration) + Send + Sync>;
type ConnectingHandler = Arc<dyn Fn() + Send + Sync>;
type ClosedCallback = Box<dyn FnOnce() + Send>;

/// Where to connect and how hard to retry.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            retry: RetryPolicy::default(),
        }
    }

    /// WebSocket URL of the hub.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}

/// Transport state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt`.
    Retrying { attempt: u32, delay: Duration },
    /// Retry budget spent.
    Failed { reason: String },
}

#[derive(Default)]
struct Handlers {
    open: Option<OpenHandler>,
    message: Option<MessageHandler>,
    error: Option<ErrorHandler>,
    retry: Option<RetryHandler>,
    connecting: Option<ConnectingHandler>,
}

struct State {
    phase: ConnectionState,
    budget: RetryBudget,
    /// Bumped by every `connect`; stale drivers leave state alone.
    generation: u64,
    /// Present while a driver task is alive.
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::Sender<WsMessage>>,
    on_closed: Option<(u64, ClosedCallback)>,
}

struct Shared {
    config: ConnectionConfig,
    handlers: Mutex<Handlers>,
    state: Mutex<State>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reconnecting connection to one hub endpoint.
///
/// Cloning yields another handle to the same connection. Each registrar
/// replaces the previous handler for its event.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let budget = RetryBudget::new(config.retry);
        Self {
            shared: Arc::new(Shared {
                config,
                handlers: Mutex::new(Handlers::default()),
                state: Mutex::new(State {
                    phase: ConnectionState::Disconnected,
                    budget,
                    generation: 0,
                    cancel: None,
                    outbound: None,
                    on_closed: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.handlers).open = Some(Arc::new(handler));
    }

    pub fn on_message(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        lock(&self.shared.handlers).message = Some(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(ClientError) + Send + Sync + 'static) {
        lock(&self.shared.handlers).error = Some(Arc::new(handler));
    }

    pub fn on_retry(&self, handler: impl Fn(Duration) + Send + Sync + 'static) {
        lock(&self.shared.handlers).retry = Some(Arc::new(handler));
    }

    pub fn on_connecting(&self, handler: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.handlers).connecting = Some(Arc::new(handler));
    }

    /// Starts connecting in the background.
    ///
    /// Failures are reported through the `retry` and `error` handlers. Does
    /// nothing while a previous connect is still active. Must be called
    /// within a Tokio runtime.
    pub fn connect(&self) {
        let (cancel, generation) = {
            let mut st = lock(&self.shared.state);
            if st.cancel.is_some() {
                debug!("connect ignored: connection already active");
                return;
            }
            st.generation += 1;
            st.budget.reset();
            st.phase = ConnectionState::Connecting;
            let cancel = CancellationToken::new();
            st.cancel = Some(cancel.clone());
            (cancel, st.generation)
        };

        tokio::spawn(drive(Arc::clone(&self.shared), cancel, generation));
    }

    /// Closes the connection and suppresses any scheduled retry.
    ///
    /// If connected, `done` runs once the close handshake has been sent;
    /// otherwise it runs before this returns.
    pub fn disconnect(&self, done: impl FnOnce() + Send + 'static) {
        let mut st = lock(&self.shared.state);
        let Some(cancel) = st.cancel.take() else {
            drop(st);
            done();
            return;
        };

        if st.phase == ConnectionState::Connected {
            st.on_closed = Some((st.generation, Box::new(done)));
            cancel.cancel();
        } else {
            cancel.cancel();
            st.phase = ConnectionState::Disconnected;
            st.outbound = None;
            drop(st);
            done();
        }
    }

    /// Disconnects and waits until the close has completed.
    pub async fn disconnect_and_wait(&self) {
        let (tx, rx) = oneshot::channel();
        self.disconnect(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Returns `true` while the socket is open.
    pub fn connected(&self) -> bool {
        lock(&self.shared.state).phase == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.state).phase.clone()
    }

    /// Queues a message on the open socket.
    pub fn send(&self, message: &Message) -> Result<(), ClientError> {
        let text = encode(message)?;
        let tx = lock(&self.shared.state)
            .outbound
            .clone()
            .ok_or(ClientError::NotConnected)?;
        tx.try_send(WsMessage::Text(text.into()))
            .map_err(|_| ClientError::NotConnected)
    }
}

impl Shared {
    fn set_phase(&self, generation: u64, phase: ConnectionState) {
        let mut st = lock(&self.state);
        if st.generation == generation {
            st.phase = phase;
        }
    }

    /// Publishes the open socket unless a disconnect got there first.
    ///
    /// `disconnect` cancels under the same lock, so the two cannot interleave.
    fn mark_connected(
        &self,
        generation: u64,
        outbound: mpsc::Sender<WsMessage>,
        cancel: &CancellationToken,
    ) -> bool {
        let mut st = lock(&self.state);
        if st.generation != generation || cancel.is_cancelled() {
            return false;
        }
        st.phase = ConnectionState::Connected;
        st.budget.reset();
        st.outbound = Some(outbound);
        true
    }

    fn clear_outbound(&self, generation: u64) {
        let mut st = lock(&self.state);
        if st.generation == generation {
            st.outbound = None;
        }
    }

    fn next_retry(&self, generation: u64) -> RetryDecision {
        let mut st = lock(&self.state);
        if st.generation != generation {
            return RetryDecision::Exhausted;
        }
        st.budget.on_failure()
    }

    /// Releases the driver slot and runs a pending disconnect callback.
    fn finish(&self, generation: u64, final_phase: ConnectionState) {
        let closed = {
            let mut st = lock(&self.state);
            if st.generation == generation {
                st.phase = final_phase;
                st.cancel = None;
                st.outbound = None;
            }
            match st.on_closed.take() {
                Some((g, cb)) if g == generation => Some(cb),
                other => {
                    st.on_closed = other;
                    None
                }
            }
        };
        if let Some(cb) = closed {
            cb();
        }
    }

    fn emit_open(&self) {
        let handler = lock(&self.handlers).open.clone();
        if let Some(h) = handler {
            h();
        }
    }

    fn emit_message(&self, message: Message) {
        let handler = lock(&self.handlers).message.clone();
        match handler {
            Some(h) => h(message),
            None => debug!(kind = message.kind(), "no message handler registered"),
        }
    }

    fn emit_error(&self, error: ClientError) {
        let handler = lock(&self.handlers).error.clone();
        match handler {
            Some(h) => h(error),
            None => warn!("unhandled connection error: {error}"),
        }
    }

    fn emit_retry(&self, delay: Duration) {
        let handler = lock(&self.handlers).retry.clone();
        if let Some(h) = handler {
            h(delay);
        }
    }

    fn emit_connecting(&self) {
        let handler = lock(&self.handlers).connecting.clone();
        if let Some(h) = handler {
            h();
        }
    }
}

fn ws_config() -> tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
    let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config
}

/// Connection driver: one loop iteration per connect attempt.
async fn drive(shared: Arc<Shared>, cancel: CancellationToken, generation: u64) {
    let url = shared.config.url();

    loop {
        shared.set_phase(generation, ConnectionState::Connecting);
        shared.emit_connecting();
        debug!(%url, "connecting");

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config()), false) => result,
        };

        let reason = match attempt {
            Ok((ws_stream, _)) => run_connection(&shared, ws_stream, &cancel, generation).await,
            Err(e) => e.to_string(),
        };

        if cancel.is_cancelled() {
            break;
        }

        match shared.next_retry(generation) {
            RetryDecision::Exhausted => {
                warn!(%url, %reason, "giving up on hub connection");
                shared.finish(
                    generation,
                    ConnectionState::Failed {
                        reason: reason.clone(),
                    },
                );
                shared.emit_error(ClientError::ConnectionExhausted { reason });
                return;
            }
            RetryDecision::Retry { attempt, delay } => {
                info!(
                    %url,
                    %reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "hub connection failed, retrying"
                );
                shared.set_phase(generation, ConnectionState::Retrying { attempt, delay });
                shared.emit_retry(delay);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!(%url, "connection closed");
    shared.finish(generation, ConnectionState::Disconnected);
}

/// Pumps one open socket until it drops or the connection is cancelled.
///
/// Returns the reason the socket went away.
async fn run_connection<S>(
    shared: &Shared,
    ws_stream: S,
    cancel: &CancellationToken,
    generation: u64,
) -> String
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(OUTBOUND_BUFFER);
    if !shared.mark_connected(generation, tx, cancel) {
        debug!("disconnected while the handshake was completing");
        return "disconnected".to_string();
    }

    let (sink, mut stream) = ws_stream.split();
    let pump_cancel = cancel.child_token();
    let writer = tokio::spawn(write_pump(sink, rx, pump_cancel.clone()));

    info!(url = %shared.config.url(), "connected to hub");
    shared.emit_open();

    let mut reassembler = Reassembler::new();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "disconnected".to_string(),

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match decode(text.as_str()) {
                    Ok(message) => {
                        if let Some(complete) = reassembler.accept(message) {
                            shared.emit_message(complete);
                        }
                    }
                    Err(e) => warn!("dropping malformed frame: {e}"),
                },
                Some(Ok(WsMessage::Close(frame))) => break close_reason(frame),
                Some(Ok(_)) => {} // Pings are answered by the socket itself.
                Some(Err(e)) => break e.to_string(),
                None => break "connection closed".to_string(),
            },
        }
    };

    if reassembler.pending() > 0 {
        debug!(pending = reassembler.pending(), "discarding partial payloads");
    }
    shared.clear_outbound(generation);
    pump_cancel.cancel();
    let _ = writer.await;
    reason
}

fn close_reason(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(f) if !f.reason.is_empty() => format!("{} ({})", f.reason.as_str(), u16::from(f.code)),
        Some(f) => format!("closed by server ({})", u16::from(f.code)),
        None => "closed by server".to_string(),
    }
}

/// Writes queued frames; sends a close frame on the way out.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = sink.send(m).await {
                            debug!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}
