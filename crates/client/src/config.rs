//! Per-site client configuration.
//!
//! Stored as TOML:
//!
//! ```toml
//! port = 8888
//!
//! [[sites]]
//! pattern = "/\\.local$/i"
//! server = "localhost"
//! port = 9000
//! ```

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use hotpatch_protocol::constants::DEFAULT_PORT;

/// Errors loading or saving the client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hub port used when a site does not set its own.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sites the client is enabled for, checked in order.
    #[serde(default)]
    pub sites: Vec<Site>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            sites: Vec::new(),
        }
    }
}

/// One enabled site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Host name, or `/regex/flags`.
    pub pattern: String,
    /// Hub host; defaults to the page's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Hub port; defaults to [`ClientConfig::port`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Site {
    /// Site that enables `host` against a hub on the same host.
    pub fn for_host(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            pattern: host.clone(),
            server: Some(host),
            port: None,
        }
    }
}

/// Parsed [`Site::pattern`].
#[derive(Debug, Clone)]
pub enum SitePattern {
    Exact(String),
    Regex(Regex),
}

impl SitePattern {
    /// Parses a pattern. `/source/flags` (flags from `gim`) is a regex,
    /// anything else must equal the host.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let Some((source, flags)) = split_regex_literal(pattern) else {
            return Ok(Self::Exact(pattern.to_string()));
        };
        RegexBuilder::new(source)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .build()
            .map(Self::Regex)
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(value) => value == host,
            Self::Regex(re) => re.is_match(host),
        }
    }
}

fn split_regex_literal(pattern: &str) -> Option<(&str, &str)> {
    let body = pattern.strip_prefix('/')?;
    let end = body.rfind('/')?;
    let (source, flags) = (&body[..end], &body[end + 1..]);
    if source.is_empty() || !flags.chars().all(|c| matches!(c, 'g' | 'i' | 'm')) {
        return None;
    }
    Some((source, flags))
}

impl ClientConfig {
    /// First site whose pattern matches `host`.
    pub fn find_site(&self, host: &str) -> Option<&Site> {
        self.sites.iter().find(|site| match SitePattern::parse(&site.pattern) {
            Ok(pattern) => pattern.matches(host),
            Err(e) => {
                warn!(pattern = %site.pattern, "skipping invalid site pattern: {e}");
                false
            }
        })
    }

    /// Adds an exact-match site for `host` unless one already matches.
    ///
    /// Returns `true` if the configuration changed.
    pub fn enable_host(&mut self, host: &str) -> bool {
        if self.find_site(host).is_some() {
            return false;
        }
        self.sites.push(Site::for_host(host));
        true
    }
}

/// Persistence for [`ClientConfig`].
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<ClientConfig, ConfigError>;

    fn save(&self, config: &ClientConfig) -> Result<(), ConfigError>;
}

/// TOML file store.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    /// Loads the file, or returns defaults if it does not exist.
    fn load(&self) -> Result<ClientConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(ClientConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %self.path.display(), "client configuration saved");
        Ok(())
    }
}
