//! Messages exchanged between the hub and its clients.
//!
//! Every WebSocket text frame carries one JSON object. Frames are parsed
//! into a flat [`WireFrame`] first and then validated into the closed
//! [`Message`] enum, so malformed input never reaches the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;
use crate::matching::{MatchKind, MatchSpec};

/// A content change addressed to one page resource.
///
/// For an `update`, exactly one of `contents` (whole or final piece) and
/// `part` (a leading fragment) is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub resource_url: String,
    pub contents: Option<String>,
    pub part: Option<String>,
    pub match_kind: Option<MatchKind>,
}

impl ResourceUpdate {
    /// Creates an update carrying the full contents of a resource.
    pub fn new(resource_url: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            resource_url: resource_url.into(),
            contents: Some(contents.into()),
            part: None,
            match_kind: None,
        }
    }

    /// Sets the matcher used to locate the resource on the page.
    pub fn with_match(mut self, kind: MatchKind) -> Self {
        self.match_kind = Some(kind);
        self
    }

    /// Returns `true` if this frame is a leading fragment.
    pub fn is_part(&self) -> bool {
        self.part.is_some()
    }

    /// Resolves the matcher against this update's URL.
    pub fn match_spec(&self) -> MatchSpec {
        MatchSpec::resolve(self.match_kind.as_ref(), &self.resource_url)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireFrame", into = "WireFrame")]
pub enum Message {
    /// Replace a resource's contents.
    Update(ResourceUpdate),
    /// Same payload as an update; contents are optional.
    Sync(ResourceUpdate),
    /// From a client: the page's origin and path. From the hub: a request
    /// for the client to send it.
    BaseUrl { url: Option<String> },
    /// Reload the whole page.
    Reload,
}

impl Message {
    /// Creates an update message with full contents.
    pub fn update(resource_url: impl Into<String>, contents: impl Into<String>) -> Self {
        Self::Update(ResourceUpdate::new(resource_url, contents))
    }

    /// Creates the client's BaseUrl handshake.
    pub fn base_url(url: impl Into<String>) -> Self {
        Self::BaseUrl {
            url: Some(url.into()),
        }
    }

    /// Returns the resource URL for update and sync messages.
    pub fn resource_url(&self) -> Option<&str> {
        match self {
            Self::Update(u) | Self::Sync(u) => Some(&u.resource_url),
            _ => None,
        }
    }

    /// Short name of the message kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update(_) => ACTION_UPDATE,
            Self::Sync(_) => ACTION_SYNC,
            Self::BaseUrl { .. } => ACTION_BASE_URL,
            Self::Reload => "reload",
        }
    }
}

const ACTION_UPDATE: &str = "update";
const ACTION_SYNC: &str = "sync";
const ACTION_BASE_URL: &str = "baseUrl";

/// Flat JSON shape shared by every frame.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(rename = "resourceURL", default, skip_serializing_if = "Option::is_none")]
    resource_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    part: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    match_kind: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    reload: bool,
}

impl TryFrom<WireFrame> for Message {
    type Error = ProtocolError;

    fn try_from(frame: WireFrame) -> Result<Self, Self::Error> {
        if frame.reload {
            return Ok(Self::Reload);
        }

        let action = frame.action.ok_or(ProtocolError::MissingAction)?;
        let action: &'static str = match action.as_str() {
            ACTION_UPDATE => ACTION_UPDATE,
            ACTION_SYNC => ACTION_SYNC,
            ACTION_BASE_URL => return Ok(Self::BaseUrl { url: frame.url }),
            other => return Err(ProtocolError::UnknownAction(other.to_string())),
        };

        let resource_url = frame
            .resource_url
            .filter(|url| !url.is_empty())
            .ok_or(ProtocolError::MissingField {
                action,
                field: "resourceURL",
            })?;
        let match_kind = frame.match_kind.map(MatchKind::try_from).transpose()?;

        let update = ResourceUpdate {
            resource_url,
            contents: frame.contents,
            part: frame.part,
            match_kind,
        };

        if update.contents.is_some() && update.part.is_some() {
            return Err(ProtocolError::ConflictingBody(update.resource_url));
        }

        if action == ACTION_SYNC {
            return Ok(Self::Sync(update));
        }
        if update.contents.is_none() && update.part.is_none() {
            return Err(ProtocolError::MissingField {
                action,
                field: "contents",
            });
        }
        Ok(Self::Update(update))
    }
}

impl From<Message> for WireFrame {
    fn from(message: Message) -> Self {
        let update_frame = |action: &str, update: ResourceUpdate| WireFrame {
            action: Some(action.to_string()),
            resource_url: Some(update.resource_url),
            contents: update.contents,
            part: update.part,
            match_kind: update.match_kind.map(Value::from),
            ..WireFrame::default()
        };

        match message {
            Message::Update(update) => update_frame(ACTION_UPDATE, update),
            Message::Sync(update) => update_frame(ACTION_SYNC, update),
            Message::BaseUrl { url } => WireFrame {
                action: Some(ACTION_BASE_URL.to_string()),
                url,
                ..WireFrame::default()
            },
            Message::Reload => WireFrame {
                reload: true,
                ..WireFrame::default()
            },
        }
    }
}

/// Parses a text frame, reporting validation failures with their own variant.
pub(crate) fn parse_frame(text: &str) -> Result<Message, ProtocolError> {
    let frame: WireFrame = serde_json::from_str(text)?;
    Message::try_from(frame)
}
