//! Server settings.
//!
//! Optional TOML file, every field defaulted:
//!
//! ```toml
//! host = "localhost"
//! port = 8888
//! patterns = ["*.js", "*.css"]
//! debounce_ms = 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hotpatch_protocol::constants::{DEFAULT_HOST, DEFAULT_PORT};
use hotpatch_watcher::DEFAULT_PATTERNS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Glob patterns of files to push, relative to the watched directory.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    /// Quiet period before a burst of file events is handled.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|p| (*p).to_string()).collect()
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            patterns: default_patterns(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "settings file loaded");
        Ok(settings)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
