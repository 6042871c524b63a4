//! Wires the hub and the file watcher together.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hotpatch_hub::{BroadcastHub, HubConfig};
use hotpatch_watcher::{FileResolver, LiveReload, WatchConfig};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;

const BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the hub and watcher until `shutdown` completes or a component fails.
pub async fn run(
    dir: PathBuf,
    settings: Settings,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("cannot watch {}", dir.display()))?;
    let cancel = CancellationToken::new();

    // -- Hub --
    let hub = BroadcastHub::new(HubConfig {
        host: settings.host.clone(),
        port: settings.port,
        ..HubConfig::default()
    });
    let hub_run = Arc::clone(&hub);
    let hub_cancel = cancel.clone();
    let hub_task = tokio::spawn(async move {
        let result = hub_run.run().await;
        if let Err(e) = &result {
            tracing::error!("hub error: {e}");
        }
        hub_cancel.cancel();
        result
    });

    let port = tokio::time::timeout(BIND_TIMEOUT, async {
        loop {
            let port = hub.port().await;
            if port > 0 || cancel.is_cancelled() {
                break port;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or(0);
    if port == 0 {
        hub.close().await;
        hub_task.await??;
        anyhow::bail!("hub did not start on {}:{}", settings.host, settings.port);
    }
    tracing::info!(host = %settings.host, port, "hub listening");

    // -- Watcher --
    let watch = WatchConfig {
        root: root.clone(),
        patterns: settings.patterns.clone(),
        debounce: settings.debounce(),
    };
    let pipeline = LiveReload::new(Arc::clone(&hub), Arc::new(FileResolver::new(&root)), watch);
    let watch_cancel = cancel.clone();
    let watch_task = tokio::spawn(async move {
        let result = pipeline.run(watch_cancel.clone()).await;
        if let Err(e) = &result {
            tracing::error!("watcher error: {e}");
        }
        watch_cancel.cancel();
        result
    });

    tokio::select! {
        _ = shutdown => tracing::info!("shutdown requested"),
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    hub.close().await;
    let watch_result = watch_task.await?;
    let hub_result = hub_task.await?;
    watch_result?;
    hub_result?;
    Ok(())
}
