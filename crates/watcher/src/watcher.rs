//! Debounced recursive directory watcher.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::WatchError;

/// Files watched when no patterns are configured.
pub const DEFAULT_PATTERNS: &[&str] = &["*.js", "*.css"];

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
const EVENT_BUFFER: usize = 64;

/// What to watch.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    /// Glob patterns matched against paths relative to `root`.
    pub patterns: Vec<String>,
    pub debounce: Duration,
}

impl WatchConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: DEFAULT_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Watches a directory tree and yields batches of changed files.
///
/// Dropping the watcher stops it.
pub struct ChangeWatcher {
    root: PathBuf,
    patterns: Vec<Pattern>,
    rx: mpsc::Receiver<Vec<PathBuf>>,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ChangeWatcher {
    pub fn start(config: &WatchConfig) -> Result<Self, WatchError> {
        let root = config.root.canonicalize()?;
        let patterns = config
            .patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut debouncer = new_debouncer(config.debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths = events.into_iter().map(|e| e.path).collect();
                    // Runs on the debouncer's thread.
                    let _ = tx.blocking_send(paths);
                }
                Err(e) => warn!("watch error: {e}"),
            }
        })?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        info!(root = %root.display(), patterns = ?config.patterns, "watching for changes");
        Ok(Self {
            root,
            patterns,
            rx,
            _debouncer: debouncer,
        })
    }

    /// Canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Waits for the next batch of changed files that match the patterns.
    ///
    /// Returns `None` once the watcher has stopped.
    pub async fn next_changes(&mut self) -> Option<Vec<PathBuf>> {
        loop {
            let paths = self.rx.recv().await?;
            let matched = filter_changes(&self.root, &self.patterns, paths);
            if !matched.is_empty() {
                return Some(matched);
            }
        }
    }
}

/// Keeps files under `root` that match any pattern, deduplicated and sorted.
fn filter_changes(root: &Path, patterns: &[Pattern], paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let unique: BTreeSet<PathBuf> = paths.into_iter().collect();
    unique
        .into_iter()
        .filter(|path| !path.is_dir())
        .filter(|path| {
            let Ok(relative) = path.strip_prefix(root) else {
                debug!(path = %path.display(), "ignoring change outside root");
                return false;
            };
            patterns.iter().any(|p| p.matches_path(relative))
        })
        .collect()
}
