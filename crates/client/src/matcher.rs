//! Picks the page resource an update is addressed to.

use regex::{Regex, RegexBuilder};

use hotpatch_protocol::{MatchSpec, ProtocolError};

use crate::browser::ResourceHandle;
use crate::resources::KnownResourceSet;

/// A compiled [`MatchSpec`].
#[derive(Debug, Clone)]
pub enum ResourceMatcher {
    Substring(String),
    Exact(String),
    Regex(Regex),
}

impl ResourceMatcher {
    /// Compiles a matcher. Regex patterns are compiled here, once per message.
    pub fn compile(spec: &MatchSpec) -> Result<Self, ProtocolError> {
        match spec {
            MatchSpec::Substring(needle) => Ok(Self::Substring(needle.clone())),
            MatchSpec::Exact(value) => Ok(Self::Exact(value.clone())),
            MatchSpec::Regex { source, flags } => RegexBuilder::new(source)
                .case_insensitive(flags.ignore_case)
                .multi_line(flags.multiline)
                .build()
                .map(Self::Regex)
                .map_err(|e| ProtocolError::InvalidPattern {
                    pattern: source.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        match self {
            Self::Substring(needle) => url.contains(needle.as_str()),
            Self::Exact(value) => url == value,
            Self::Regex(re) => re.is_match(url),
        }
    }

    /// First resource, in registration order, whose URL matches.
    pub fn find<'a>(&self, resources: &'a KnownResourceSet) -> Option<&'a ResourceHandle> {
        resources
            .iter()
            .find(|(url, _)| self.is_match(url))
            .map(|(_, handle)| handle)
    }
}
