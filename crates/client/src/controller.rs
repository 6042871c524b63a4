//! Decides whether the inspected page is enabled and owns its session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::browser::BrowserApi;
use crate::config::{ClientConfig, ConfigStore};
use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionConfig};
use crate::status::{Status, StatusEvent, StatusSink, StatusTracker};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Top-level client: one per inspected page.
///
/// Looks the page's host up in the [`ClientConfig`]. Enabled hosts get a
/// [`Session`]; others are reported as [`Status::Disabled`] until the user
/// enables them.
pub struct Controller<B: BrowserApi> {
    browser: Arc<B>,
    store: Arc<dyn ConfigStore>,
    config: Mutex<ClientConfig>,
    session: tokio::sync::Mutex<Option<Session<B>>>,
    status: Arc<StatusTracker>,
    retry: RetryPolicy,
}

impl<B: BrowserApi> Controller<B> {
    /// Creates a controller, loading configuration from `store`.
    pub fn new(
        browser: Arc<B>,
        store: Arc<dyn ConfigStore>,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self, ClientError> {
        let config = store.load()?;
        Ok(Self {
            browser,
            store,
            config: Mutex::new(config),
            session: tokio::sync::Mutex::new(None),
            status: Arc::new(StatusTracker::new(sink)),
            retry: RetryPolicy::default(),
        })
    }

    /// Overrides the retry policy used by new sessions.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn status(&self) -> Status {
        self.status.current()
    }

    pub fn config(&self) -> ClientConfig {
        lock(&self.config).clone()
    }

    /// Current session, if the host is enabled.
    pub async fn session(&self) -> Option<Session<B>> {
        self.session.lock().await.clone()
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        self.status.handle(StatusEvent::Start);
        self.start_new_session().await
    }

    /// Adds the page's host to the configuration and starts a session.
    pub async fn enable_for_host(&self) -> Result<(), ClientError> {
        let host = self.host().await?;
        let saved = {
            let mut config = lock(&self.config);
            if config.enable_host(&host) {
                Some(config.clone())
            } else {
                None
            }
        };
        if let Some(config) = saved {
            self.store.save(&config)?;
            info!(%host, "enabled for host");
        }

        self.status.handle(StatusEvent::Enable);
        self.start_new_session().await
    }

    /// User-requested retry after the retry budget ran out.
    pub async fn retry(&self) -> Result<(), ClientError> {
        self.status.handle(StatusEvent::RetryRequested);
        self.start_new_session().await
    }

    /// Saves a new configuration and restarts against it.
    pub async fn update_config(&self, config: ClientConfig) -> Result<(), ClientError> {
        self.store.save(&config)?;
        *lock(&self.config) = config;
        self.start().await
    }

    /// Destroys the current session, if any.
    pub async fn stop(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.destroy().await;
        }
    }

    async fn host(&self) -> Result<String, ClientError> {
        self.browser
            .inspected_host()
            .await
            .ok_or(ClientError::LocationUnavailable)
    }

    async fn start_new_session(&self) -> Result<(), ClientError> {
        let mut slot = self.session.lock().await;
        if let Some(old) = slot.take() {
            old.destroy().await;
        }

        let host = self.host().await?;
        let (site, default_port) = {
            let config = lock(&self.config);
            (config.find_site(&host).cloned(), config.port)
        };
        let Some(site) = site else {
            info!(%host, "not enabled for host");
            self.status.handle(StatusEvent::HostDisabled);
            return Ok(());
        };

        let config = SessionConfig {
            host: site.server.unwrap_or(host),
            port: site.port.unwrap_or(default_port),
            retry: self.retry,
        };
        debug!(host = %config.host, port = config.port, "starting session");

        let session = Session::new(config, Arc::clone(&self.browser), Arc::clone(&self.status));
        let starter = session.clone();
        let status = Arc::clone(&self.status);
        tokio::spawn(async move {
            if let Err(e) = starter.start().await {
                // Exhaustion is already reported as Status::Error.
                if !e.is_session_fatal() {
                    status.diagnostic(&e);
                }
            }
        });

        *slot = Some(session);
        Ok(())
    }
}
