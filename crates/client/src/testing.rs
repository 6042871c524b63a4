//! In-memory [`BrowserApi`] for unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use hotpatch_protocol::{Message, decode};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::browser::{
    ApplyStatus, BrowserApi, BrowserFuture, NavigationListener, ResourceHandle, ResourceKind,
    ResourceListener, SubscriptionId,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct FakeBrowser {
    pub(crate) resources: Mutex<Vec<ResourceHandle>>,
    pub(crate) applied: Mutex<Vec<(String, String)>>,
    pub(crate) evals: Mutex<Vec<String>>,
    pub(crate) reloads: AtomicU64,
    pub(crate) fail_with: Mutex<Option<ApplyStatus>>,
    pub(crate) listeners: Mutex<Vec<(SubscriptionId, ResourceListener)>>,
    pub(crate) navigation: Mutex<Vec<(SubscriptionId, NavigationListener)>>,
    pub(crate) next_id: AtomicU64,
    /// Overrides the default `localhost` host.
    pub(crate) host: Mutex<Option<String>>,
    /// Overrides the default `http://localhost:3000/` location.
    pub(crate) location: Mutex<Option<String>>,
}

impl FakeBrowser {
    pub(crate) fn with(urls: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        for (i, url) in urls.iter().enumerate() {
            lock(&fake.resources).push(ResourceHandle::new(
                i as u64,
                *url,
                ResourceKind::Script,
            ));
        }
        Arc::new(fake)
    }

    pub(crate) fn set_host(&self, host: &str) {
        *lock(&self.host) = Some(host.to_string());
    }

    /// Simulates a top-level navigation, optionally to a new location.
    pub(crate) fn navigate(&self, location: Option<&str>) {
        if let Some(location) = location {
            *lock(&self.location) = Some(location.to_string());
        }
        for (_, listener) in lock(&self.navigation).iter() {
            listener();
        }
    }
}

impl BrowserApi for FakeBrowser {
    fn inspected_location(&self) -> BrowserFuture<'_, Option<String>> {
        Box::pin(async move {
            Some(
                lock(&self.location)
                    .clone()
                    .unwrap_or_else(|| "http://localhost:3000/".into()),
            )
        })
    }

    fn inspected_host(&self) -> BrowserFuture<'_, Option<String>> {
        Box::pin(async move { Some(lock(&self.host).clone().unwrap_or_else(|| "localhost".into())) })
    }

    fn enumerate_resources(&self) -> BrowserFuture<'_, Vec<ResourceHandle>> {
        Box::pin(async move { lock(&self.resources).clone() })
    }

    fn on_resource_added(&self, listener: ResourceListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn on_navigated(&self, listener: NavigationListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.navigation).push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.listeners).retain(|(l, _)| *l != id);
        lock(&self.navigation).retain(|(l, _)| *l != id);
    }

    fn set_content<'a>(
        &'a self,
        resource: &'a ResourceHandle,
        contents: &'a str,
        _preserve_state: bool,
    ) -> BrowserFuture<'a, ApplyStatus> {
        Box::pin(async move {
            if let Some(status) = lock(&self.fail_with).clone() {
                return status;
            }
            lock(&self.applied).push((resource.url().to_string(), contents.to_string()));
            ApplyStatus::ok()
        })
    }

    fn reload(&self) -> BrowserFuture<'_, ()> {
        Box::pin(async move {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn eval_in_page<'a>(&'a self, script: &'a str) -> BrowserFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.evals).push(script.to_string());
        })
    }
}

/// WebSocket endpoint that records every decoded frame with the index of
/// the connection it arrived on.
pub(crate) struct RecordingHub {
    pub(crate) port: u16,
    frames: mpsc::UnboundedReceiver<(usize, Message)>,
}

impl RecordingHub {
    pub(crate) async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, frames) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut next = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let index = next;
                next += 1;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(frame)) = ws.next().await {
                        if let WsMessage::Text(text) = frame {
                            if let Ok(message) = decode(text.as_str()) {
                                let _ = tx.send((index, message));
                            }
                        }
                    }
                });
            }
        });

        Self { port, frames }
    }

    pub(crate) async fn next_frame(&mut self) -> (usize, Message) {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("frame in time")
            .expect("hub running")
    }
}
