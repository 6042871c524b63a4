use std::time::Duration;

/// Default port the hub listens on and clients connect to.
pub const DEFAULT_PORT: u16 = 8888;

/// Default interface the hub binds to.
pub const DEFAULT_HOST: &str = "localhost";

/// Largest `contents` payload (in characters) sent as a single frame.
///
/// Anything longer is split into `part` frames of exactly this size
/// followed by one terminal `contents` frame.
pub const CHUNK_SIZE: usize = 50_000;

/// Number of reconnect attempts a client makes before giving up.
pub const RETRY_BUDGET: u32 = 5;

/// Linear backoff step between reconnect attempts.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// How often the hub pings each connected client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(30);

/// Maximum WebSocket message size in bytes (16 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Outbound queue depth per connection, counted in batches.
pub const SEND_BUFFER_SIZE: usize = 256;
