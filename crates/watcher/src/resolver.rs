//! Turning changed files into resources.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hotpatch_protocol::{MatchKind, Message, ProtocolError, ResourceUpdate};

use crate::error::WatchError;

pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<ResolvedResource>, WatchError>> + Send + 'a>>;

/// Maps a changed file to the resource to push, if any.
pub trait Resolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, path: &'a Path) -> ResolveFuture<'a>;
}

/// What a resolver hands back for one changed file.
///
/// Deserializes from the same JSON shape an update frame uses, so external
/// resolvers can emit it directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResource {
    #[serde(rename = "resourceURL", default)]
    pub resource_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<MatchKind>,
    /// Reload the whole page instead of patching a resource.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reload: bool,
}

impl ResolvedResource {
    pub fn new(resource_url: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            resource_url: resource_url.into(),
            contents: Some(contents.into()),
            ..Self::default()
        }
    }

    pub fn reload() -> Self {
        Self {
            reload: true,
            ..Self::default()
        }
    }

    pub fn with_match(mut self, kind: MatchKind) -> Self {
        self.match_kind = Some(kind);
        self
    }

    /// Parses resolver output. Unknown matchers are rejected here.
    pub fn from_json(text: &str) -> Result<Self, WatchError> {
        serde_json::from_str(text).map_err(|e| WatchError::InvalidResource(e.to_string()))
    }
}

/// Validates a resolved resource and builds the message to broadcast.
///
/// Backslashes in the URL become `/`. The matcher defaults to substring
/// matching, and regex matchers must compile.
pub fn normalize(resource: ResolvedResource) -> Result<Message, WatchError> {
    if resource.reload {
        return Ok(Message::Reload);
    }

    let url = resource.resource_url.replace('\\', "/");
    if url.is_empty() {
        return Err(WatchError::InvalidResource("resourceURL is required".into()));
    }
    let Some(contents) = resource.contents else {
        return Err(WatchError::InvalidResource(format!(
            "no contents for {url}"
        )));
    };

    let kind = resource.match_kind.unwrap_or(MatchKind::IndexOf);
    if let MatchKind::Regexp { source, flags } = &kind {
        RegexBuilder::new(source)
            .case_insensitive(flags.ignore_case)
            .multi_line(flags.multiline)
            .build()
            .map_err(|e| ProtocolError::InvalidPattern {
                pattern: source.clone(),
                reason: e.to_string(),
            })?;
    }

    Ok(Message::Update(ResourceUpdate::new(url, contents).with_match(kind)))
}

/// Reads the changed file and addresses it by its path under `root`.
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Resolver for FileResolver {
    fn resolve<'a>(&'a self, path: &'a Path) -> ResolveFuture<'a> {
        Box::pin(async move {
            let relative = path.strip_prefix(&self.root).map_err(|_| {
                WatchError::InvalidResource(format!(
                    "{} is outside {}",
                    path.display(),
                    self.root.display()
                ))
            })?;

            let contents = match tokio::fs::read_to_string(path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "file removed, nothing to push");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            Ok(Some(ResolvedResource::new(url_path(relative), contents)))
        })
    }
}

/// Relative path joined with `/` whatever the platform separator.
fn url_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
