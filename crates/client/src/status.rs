//! User-visible status derived from connection and session events.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClientError;

/// Status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Starting,
    Connecting,
    Connected,
    Started,
    Retry(Duration),
    Error,
    Disabled,
}

impl Status {
    /// Action the user can take to leave this state.
    pub fn action(&self) -> Option<RecoveryAction> {
        match self {
            Self::Error => Some(RecoveryAction::Retry),
            Self::Disabled => Some(RecoveryAction::Enable),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("Starting"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected => f.write_str("Connected"),
            Self::Started => f.write_str("Started"),
            Self::Retry(delay) => write!(
                f,
                "Failed to connect, retrying in {}s",
                delay.as_secs_f64()
            ),
            Self::Error => f.write_str("Error connecting"),
            Self::Disabled => f.write_str("Disabled for this site"),
        }
    }
}

/// User-triggerable recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    Enable,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Enable => "enable",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A new session is being set up.
    Start,
    Connecting,
    Open,
    /// Post-connect setup finished.
    Started,
    Retry(Duration),
    Exhausted,
    HostDisabled,
    Enable,
    RetryRequested,
}

/// One accepted transition, as delivered to a [`StatusSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: Status,
    pub text: String,
    pub action: Option<RecoveryAction>,
}

impl From<Status> for StatusReport {
    fn from(status: Status) -> Self {
        Self {
            status,
            text: status.to_string(),
            action: status.action(),
        }
    }
}

/// Status state machine.
///
/// `Starting → Connecting → Connected → Started`, with `Retry` looping back
/// to `Connecting` and `Error` once retries run out. `Disabled` can be
/// entered from anywhere and is left only by `Enable` or a new `Start`.
#[derive(Debug, Clone)]
pub struct StatusStateMachine {
    current: Status,
}

impl Default for StatusStateMachine {
    fn default() -> Self {
        Self {
            current: Status::Starting,
        }
    }
}

impl StatusStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Status {
        self.current
    }

    /// Applies an event. Returns the new status if the transition is valid.
    pub fn apply(&mut self, event: StatusEvent) -> Option<Status> {
        use Status as S;
        use StatusEvent as E;

        let next = match (self.current, event) {
            (_, E::Start) => S::Starting,
            (_, E::HostDisabled) => S::Disabled,
            (S::Disabled, E::Enable) => S::Starting,
            (S::Error, E::RetryRequested) => S::Starting,
            (S::Starting | S::Retry(_) | S::Connected | S::Started, E::Connecting) => S::Connecting,
            (S::Connecting, E::Open) => S::Connected,
            (S::Connected | S::Started, E::Started) => S::Started,
            (S::Connecting | S::Connected | S::Started, E::Retry(delay)) => S::Retry(delay),
            (S::Connecting | S::Connected | S::Started | S::Retry(_), E::Exhausted) => S::Error,
            (current, event) => {
                debug!(?current, ?event, "ignoring status event");
                return None;
            }
        };
        self.current = next;
        Some(next)
    }
}

/// Receives status reports and per-message diagnostics.
pub trait StatusSink: Send + Sync {
    fn status_changed(&self, report: &StatusReport);

    fn diagnostic(&self, _error: &ClientError) {}
}

/// Sink that drops everything.
impl StatusSink for () {
    fn status_changed(&self, _report: &StatusReport) {}
}

/// A [`StatusStateMachine`] wired to a [`StatusSink`].
///
/// Shared by the controller and its sessions.
pub struct StatusTracker {
    machine: Mutex<StatusStateMachine>,
    sink: Arc<dyn StatusSink>,
}

impl StatusTracker {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            machine: Mutex::new(StatusStateMachine::new()),
            sink,
        }
    }

    /// Applies an event and reports the transition, if any.
    pub fn handle(&self, event: StatusEvent) -> Option<Status> {
        let next = self
            .machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event)?;
        self.sink.status_changed(&StatusReport::from(next));
        Some(next)
    }

    pub fn current(&self) -> Status {
        self.machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
    }

    /// Logs a per-message error and forwards it to the sink.
    pub fn diagnostic(&self, error: &ClientError) {
        warn!("{error}");
        self.sink.diagnostic(error);
    }
}
