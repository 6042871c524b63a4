//! Client side of hotpatch live updates.
//!
//! A [`Controller`] decides whether the inspected page is enabled, then runs
//! a [`Session`] that keeps a [`ConnectionManager`] open to the hub and
//! applies incoming updates to page resources through a [`BrowserApi`].

pub mod browser;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod matcher;
mod once;
pub mod resources;
pub mod retry;
pub mod session;
pub mod status;
#[cfg(test)]
mod testing;

pub use browser::{ApplyStatus, BrowserApi, BrowserFuture, ResourceHandle, ResourceKind, SubscriptionId};
pub use config::{ClientConfig, ConfigError, ConfigStore, Site, SitePattern, TomlConfigStore};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use controller::Controller;
pub use error::ClientError;
pub use matcher::ResourceMatcher;
pub use resources::KnownResourceSet;
pub use retry::{RetryBudget, RetryDecision, RetryPolicy};
pub use session::{Session, SessionConfig};
pub use status::{RecoveryAction, Status, StatusEvent, StatusReport, StatusSink, StatusStateMachine, StatusTracker};
