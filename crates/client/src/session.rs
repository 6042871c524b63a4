//! Session: connects to the hub and applies updates to the inspected page.
//!
//! Inbound messages and navigation restarts are funnelled through one
//! channel into a single worker task, so they are handled strictly in
//! order. Connection callbacks only forward into that channel or report
//! status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use hotpatch_protocol::{Message, ResourceUpdate};

use crate::browser::{BrowserApi, ResourceHandle, SubscriptionId};
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::error::ClientError;
use crate::matcher::ResourceMatcher;
use crate::once::FireOnce;
use crate::resources::KnownResourceSet;
use crate::retry::RetryPolicy;
use crate::status::{StatusEvent, StatusTracker};

/// Hub endpoint for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            retry: RetryPolicy::default(),
        }
    }
}

enum Command {
    Inbound(Message),
    Restart,
}

type Completion = Arc<FireOnce<Result<(), ClientError>>>;

struct Inner<B: BrowserApi> {
    browser: Arc<B>,
    status: Arc<StatusTracker>,
    conn: ConnectionManager,
    resources: Mutex<KnownResourceSet>,
    location: Mutex<Option<String>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    commands: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    closed: CancellationToken,
    span: tracing::Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One client session against one hub.
pub struct Session<B: BrowserApi> {
    inner: Arc<Inner<B>>,
}

impl<B: BrowserApi> Clone for Session<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BrowserApi> Session<B> {
    pub fn new(config: SessionConfig, browser: Arc<B>, status: Arc<StatusTracker>) -> Self {
        let span = info_span!("client.session", host = %config.host, port = config.port);
        let conn = ConnectionManager::new(ConnectionConfig {
            host: config.host,
            port: config.port,
            retry: config.retry,
        });
        let (commands, inbox) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                browser,
                status,
                conn,
                resources: Mutex::new(KnownResourceSet::new()),
                location: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                commands,
                inbox: Mutex::new(Some(inbox)),
                worker: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                closed: CancellationToken::new(),
                span,
            }),
        }
    }

    /// Starts the session.
    ///
    /// Resolves once, with `Ok` when the first connection opens or with
    /// the error that ended the retry budget. A session destroyed before
    /// either happens resolves with [`ClientError::NotConnected`].
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.is_destroyed() {
            return Err(ClientError::NotConnected);
        }
        self.spawn_worker();

        let (tx, rx) = oneshot::channel();
        let completion: Completion = Arc::new(FireOnce::new(move |result: Result<(), ClientError>| {
            let _ = tx.send(result);
        }));

        Arc::clone(&self.inner)
            .begin(completion)
            .instrument(self.inner.span.clone())
            .await?;

        tokio::select! {
            result = rx => result.unwrap_or(Err(ClientError::NotConnected)),
            _ = self.inner.closed.cancelled() => Err(ClientError::NotConnected),
        }
    }

    /// Queues a restart, as after a page navigation.
    pub fn restart(&self) {
        let _ = self.inner.commands.send(Command::Restart);
    }

    /// Applies one message to the page.
    pub async fn dispatch(&self, message: Message) -> Result<(), ClientError> {
        self.inner.dispatch(message).await
    }

    /// Unsubscribes from the page and closes the connection. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.closed.cancel();
        self.inner.unsubscribe_all();
        self.inner.conn.disconnect_and_wait().await;
        if let Some(worker) = lock(&self.inner.worker).take() {
            worker.abort();
        }
        let _span = self.inner.span.enter();
        info!("session destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> bool {
        self.inner.conn.connected()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.conn
    }

    /// Page location sent in the BaseUrl handshake.
    pub fn location(&self) -> Option<String> {
        lock(&self.inner.location).clone()
    }

    /// Tracked resource URLs, in registration order.
    pub fn resource_urls(&self) -> Vec<String> {
        lock(&self.inner.resources)
            .iter()
            .map(|(url, _)| url.to_string())
            .collect()
    }

    fn spawn_worker(&self) {
        let Some(inbox) = lock(&self.inner.inbox).take() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(run_worker(weak, inbox).instrument(self.inner.span.clone()));
        *lock(&self.inner.worker) = Some(handle);
    }
}

async fn run_worker<B: BrowserApi>(
    weak: Weak<Inner<B>>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = inbox.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        if inner.destroyed.load(Ordering::SeqCst) {
            break;
        }
        match command {
            Command::Inbound(message) => {
                if let Err(e) = inner.dispatch(message).await {
                    inner.status.diagnostic(&e);
                }
            }
            Command::Restart => inner.restart().await,
        }
    }
    debug!("session worker stopped");
}

impl<B: BrowserApi> Inner<B> {
    /// Reads the page location, seeds resources, subscribes and connects.
    async fn begin(self: Arc<Self>, completion: Completion) -> Result<(), ClientError> {
        let location = self
            .browser
            .inspected_location()
            .await
            .ok_or(ClientError::LocationUnavailable)?;
        *lock(&self.location) = Some(location);
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        self.subscribe();
        self.seed_resources().await;
        self.wire_connection(completion);
        self.conn.connect();
        Ok(())
    }

    async fn seed_resources(&self) {
        let handles = self.browser.enumerate_resources().await;
        let mut resources = lock(&self.resources);
        resources.clear();
        for handle in handles {
            resources.register(handle);
        }
        debug!(count = resources.len(), "resources seeded");
    }

    fn subscribe(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let added = self.browser.on_resource_added(Box::new(move |handle: ResourceHandle| {
            if let Some(inner) = weak.upgrade() {
                let url = handle.url().to_string();
                if lock(&inner.resources).register(handle) {
                    debug!(%url, "resource added");
                }
            }
        }));

        let commands = self.commands.clone();
        let navigated = self.browser.on_navigated(Box::new(move || {
            let _ = commands.send(Command::Restart);
        }));

        lock(&self.subscriptions).extend([added, navigated]);
    }

    fn unsubscribe_all(&self) {
        let ids: Vec<SubscriptionId> = lock(&self.subscriptions).drain(..).collect();
        for id in ids {
            self.browser.unsubscribe(id);
        }
    }

    fn wire_connection(self: &Arc<Self>, completion: Completion) {
        let status = Arc::clone(&self.status);
        self.conn.on_connecting(move || {
            status.handle(StatusEvent::Connecting);
        });

        let status = Arc::clone(&self.status);
        self.conn.on_retry(move |delay| {
            status.handle(StatusEvent::Retry(delay));
        });

        let weak = Arc::downgrade(self);
        let done = Arc::clone(&completion);
        self.conn.on_open(move || {
            let Some(inner) = weak.upgrade() else { return };
            inner.status.handle(StatusEvent::Open);
            inner.send_handshake();
            inner.status.handle(StatusEvent::Started);
            done.fire(Ok(()));
        });

        let status = Arc::clone(&self.status);
        self.conn.on_error(move |err| {
            error!("{err}");
            status.handle(StatusEvent::Exhausted);
            completion.fire(Err(err));
        });

        let commands = self.commands.clone();
        self.conn.on_message(move |message| {
            let _ = commands.send(Command::Inbound(message));
        });
    }

    /// Sends the BaseUrl handshake for the current page location.
    fn send_handshake(&self) {
        let Some(url) = lock(&self.location).clone() else {
            warn!("no page location for handshake");
            return;
        };
        match self.conn.send(&Message::base_url(url.as_str())) {
            Ok(()) => debug!(%url, "base URL sent"),
            Err(e) => warn!(%url, "failed to send base URL: {e}"),
        }
    }

    async fn dispatch(&self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::Update(update) => self.apply(update, false).await,
            Message::Sync(update) => self.apply(update, true).await,
            Message::Reload => {
                info!("reloading page");
                self.browser.reload().await;
                Ok(())
            }
            Message::BaseUrl { .. } => {
                self.send_handshake();
                Ok(())
            }
        }
    }

    async fn apply(&self, update: ResourceUpdate, sync: bool) -> Result<(), ClientError> {
        let matcher = ResourceMatcher::compile(&update.match_spec())?;
        let resource = matcher
            .find(&lock(&self.resources))
            .cloned()
            .ok_or_else(|| ClientError::ResourceNotFound {
                url: update.resource_url.clone(),
            })?;

        let Some(contents) = update.contents else {
            debug!(url = %update.resource_url, sync, "no contents to apply");
            return Ok(());
        };

        let status = self.browser.set_content(&resource, &contents, true).await;
        if !status.is_ok() {
            return Err(ClientError::ApplyFailed {
                url: resource.url().to_string(),
                status,
            });
        }

        info!(url = resource.url(), bytes = contents.len(), "resource updated");
        if let Some(script) = update_notice(resource.url()) {
            self.browser.eval_in_page(&script).await;
        }
        Ok(())
    }

    async fn restart(self: Arc<Self>) {
        info!("page navigated, restarting session");
        self.unsubscribe_all();

        let previous = lock(&self.location).clone();
        let current = self.browser.inspected_location().await;

        if self.conn.connected() && current.is_some() && current == previous {
            self.subscribe();
            self.seed_resources().await;
            self.send_handshake();
            self.status.handle(StatusEvent::Started);
            return;
        }

        // The hub keeps one base URL per connection, so a new location
        // needs a new connection.
        self.conn.disconnect_and_wait().await;
        // A fresh start, even after the retry budget ran out.
        self.status.handle(StatusEvent::Start);
        let completion: Completion = Arc::new(FireOnce::new(|result: Result<(), ClientError>| {
            if let Err(e) = result {
                warn!("restarted session failed: {e}");
            }
        }));
        if let Err(e) = Arc::clone(&self).begin(completion).await {
            self.status.diagnostic(&e);
        }
    }
}

/// Console notice evaluated in the page after a successful update.
fn update_notice(url: &str) -> Option<String> {
    let text = format!("[hotpatch] {url} has just been updated");
    serde_json::to_string(&text)
        .ok()
        .map(|literal| format!("console.log({literal});"))
}
