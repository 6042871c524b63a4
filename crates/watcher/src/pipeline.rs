//! Watcher → resolver → hub.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hotpatch_hub::BroadcastHub;

use crate::error::WatchError;
use crate::resolver::{Resolver, normalize};
use crate::watcher::{ChangeWatcher, WatchConfig};

/// Pushes every matching file change to the hub's clients.
pub struct LiveReload {
    hub: Arc<BroadcastHub>,
    resolver: Arc<dyn Resolver>,
    config: WatchConfig,
}

impl LiveReload {
    pub fn new(hub: Arc<BroadcastHub>, resolver: Arc<dyn Resolver>, config: WatchConfig) -> Self {
        Self {
            hub,
            resolver,
            config,
        }
    }

    /// Watches until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WatchError> {
        let mut watcher = ChangeWatcher::start(&self.config)?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changes = watcher.next_changes() => {
                    let Some(paths) = changes else {
                        warn!("file watcher stopped");
                        break;
                    };
                    for path in paths {
                        self.handle_change(&path).await;
                    }
                }
            }
        }

        info!("live reload stopped");
        Ok(())
    }

    /// Resolves one changed file and broadcasts it.
    ///
    /// Returns the number of clients the message was queued for. Failures
    /// are logged and count as zero.
    pub async fn handle_change(&self, path: &Path) -> usize {
        match self.publish(path).await {
            Ok(clients) => clients,
            Err(e) => {
                warn!(path = %path.display(), "failed to push change: {e}");
                0
            }
        }
    }

    async fn publish(&self, path: &Path) -> Result<usize, WatchError> {
        let Some(resource) = self.resolver.resolve(path).await? else {
            return Ok(0);
        };
        let message = normalize(resource)?;
        let clients = self.hub.broadcast(&message).await;

        match message.resource_url() {
            Some(url) => info!(%url, clients, "pushed change"),
            None => info!(kind = message.kind(), clients, "pushed change"),
        }
        if clients == 0 {
            debug!("no clients connected");
        }
        Ok(clients)
    }
}
