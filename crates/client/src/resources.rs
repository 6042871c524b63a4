//! The set of page resources an update can target.

use crate::browser::{ResourceHandle, ResourceKind};

/// Page resources keyed by normalized URL, in registration order.
///
/// Lookups that can match several resources pick the earliest registered.
#[derive(Debug, Default, Clone)]
pub struct KnownResourceSet {
    entries: Vec<(String, ResourceHandle)>,
}

impl KnownResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource. Returns `false` if it was skipped.
    ///
    /// Re-registering a known URL swaps in the new handle but keeps the
    /// original position.
    pub fn register(&mut self, handle: ResourceHandle) -> bool {
        let Some(url) = normalize_url(&handle) else {
            return false;
        };
        match self.entries.iter_mut().find(|(known, _)| *known == url) {
            Some(entry) => entry.1 = handle,
            None => self.entries.push((url, handle)),
        }
        true
    }

    pub fn get(&self, url: &str) -> Option<&ResourceHandle> {
        self.entries
            .iter()
            .find(|(known, _)| known == url)
            .map(|(_, h)| h)
    }

    /// Resources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceHandle)> {
        self.entries.iter().map(|(url, h)| (url.as_str(), h))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// URL under which a resource is tracked, or `None` if it is never a target.
///
/// Inline `data:` resources, the top-level document and resources without a
/// URL are skipped. The query string is dropped.
pub fn normalize_url(handle: &ResourceHandle) -> Option<String> {
    if handle.kind() == ResourceKind::Document {
        return None;
    }
    let url = handle.url();
    if url.starts_with("data:") {
        return None;
    }
    let url = url.split_once('?').map_or(url, |(path, _)| path);
    if url.is_empty() {
        return None;
    }
    Some(url.to_string())
}
