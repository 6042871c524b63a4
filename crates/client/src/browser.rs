//! Boundary to the inspected page.
//!
//! The embedder implements [`BrowserApi`] on top of whatever devtools or
//! automation surface it has. Everything here is opaque to the dispatcher
//! except a resource's URL and kind.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`BrowserApi`] methods.
pub type BrowserFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Listener for resources added to the page after enumeration.
pub type ResourceListener = Box<dyn Fn(ResourceHandle) + Send + Sync>;

/// Listener for top-level navigations of the inspected page.
pub type NavigationListener = Box<dyn Fn() + Send + Sync>;

/// What kind of page resource a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Script,
    Stylesheet,
    Other,
}

/// Opaque reference to a page resource, created by the [`BrowserApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    id: u64,
    url: String,
    kind: ResourceKind,
}

impl ResourceHandle {
    pub fn new(id: u64, url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id,
            url: url.into(),
            kind,
        }
    }

    /// Identifier assigned by the browser side.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

/// Result reported by [`BrowserApi::set_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyStatus {
    pub code: String,
    pub details: Option<String>,
}

impl ApplyStatus {
    pub const OK: &'static str = "OK";

    pub fn ok() -> Self {
        Self {
            code: Self::OK.to_string(),
            details: None,
        }
    }

    pub fn failed(code: impl Into<String>, details: Option<String>) -> Self {
        Self {
            code: code.into(),
            details,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Self::OK
    }
}

impl fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{} ({details})", self.code),
            None => f.write_str(&self.code),
        }
    }
}

/// Token returned by the subscription methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Access to the inspected page.
pub trait BrowserApi: Send + Sync + 'static {
    /// Origin plus path of the inspected page, e.g. `http://localhost:3000/app/`.
    fn inspected_location(&self) -> BrowserFuture<'_, Option<String>>;

    /// Host name of the inspected page, used to look up site configuration.
    fn inspected_host(&self) -> BrowserFuture<'_, Option<String>>;

    /// Every resource currently loaded by the page.
    fn enumerate_resources(&self) -> BrowserFuture<'_, Vec<ResourceHandle>>;

    fn on_resource_added(&self, listener: ResourceListener) -> SubscriptionId;

    fn on_navigated(&self, listener: NavigationListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Replaces the in-memory contents of a resource.
    fn set_content<'a>(
        &'a self,
        resource: &'a ResourceHandle,
        contents: &'a str,
        preserve_state: bool,
    ) -> BrowserFuture<'a, ApplyStatus>;

    /// Reloads the whole page.
    fn reload(&self) -> BrowserFuture<'_, ()>;

    /// Evaluates a script in the page.
    fn eval_in_page<'a>(&'a self, script: &'a str) -> BrowserFuture<'a, ()>;
}
