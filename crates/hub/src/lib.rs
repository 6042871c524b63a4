//! Live-update hub.
//!
//! Accepts WebSocket clients, records each client's page base URL and fans
//! update messages out to every connected client.

pub mod connection;
pub mod qualify;
pub mod server;

pub use connection::ConnectionInfo;
pub use server::{BroadcastHub, HubConfig};

/// Errors from the hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] hotpatch_protocol::ProtocolError),
}
