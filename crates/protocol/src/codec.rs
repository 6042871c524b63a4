//! Frame encoding, splitting and reassembly.
//!
//! Large contents are sent as a run of `part` frames followed by one
//! terminal frame for the same `resourceURL`. Reassembly relies on frames
//! for a URL arriving in order on a single connection.

use std::collections::HashMap;

use crate::ProtocolError;
use crate::message::{self, Message, ResourceUpdate};

/// Decodes one text frame.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    message::parse_frame(text)
}

/// Encodes one message as a text frame.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Splits an update or sync whose contents exceed `chunk_size` characters.
///
/// Produces `part` frames of exactly `chunk_size` characters, then one
/// terminal frame with the remainder in `contents`. Only the terminal frame
/// carries the matcher. Every other message is returned unchanged.
pub fn split(message: Message, chunk_size: usize) -> Vec<Message> {
    let (update, rebuild): (ResourceUpdate, fn(ResourceUpdate) -> Message) = match message {
        Message::Update(u) => (u, Message::Update),
        Message::Sync(u) => (u, Message::Sync),
        other => return vec![other],
    };

    let pieces = match update.contents.as_deref() {
        Some(contents) if chunk_size > 0 => split_chars(contents, chunk_size),
        _ => return vec![rebuild(update)],
    };
    if pieces.len() < 2 {
        return vec![rebuild(update)];
    }

    let last = pieces.len() - 1;
    let mut frames: Vec<Message> = pieces[..last]
        .iter()
        .map(|piece| {
            rebuild(ResourceUpdate {
                resource_url: update.resource_url.clone(),
                contents: None,
                part: Some((*piece).to_string()),
                match_kind: None,
            })
        })
        .collect();
    let tail = pieces[last].to_string();
    frames.push(rebuild(ResourceUpdate {
        contents: Some(tail),
        part: None,
        ..update
    }));
    frames
}

/// Cuts `s` into slices of at most `size` characters, never splitting a
/// multi-byte character.
fn split_chars(s: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in s.char_indices() {
        if count == size {
            pieces.push(&s[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&s[start..]);
    pieces
}

/// Per-URL accumulator for `part` frames.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: HashMap<String, Vec<String>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one decoded message.
    ///
    /// Returns `None` while a payload is still incomplete, otherwise the
    /// complete message. A terminal frame for a URL with buffered parts
    /// yields the parts joined with the terminal contents, and the buffer
    /// is dropped.
    pub fn accept(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Update(update) => self.accept_update(update).map(Message::Update),
            Message::Sync(update) => self.accept_update(update).map(Message::Sync),
            other => Some(other),
        }
    }

    fn accept_update(&mut self, mut update: ResourceUpdate) -> Option<ResourceUpdate> {
        if let Some(part) = update.part.take() {
            self.buffers
                .entry(update.resource_url)
                .or_default()
                .push(part);
            return None;
        }

        if let Some(mut parts) = self.buffers.remove(&update.resource_url) {
            if let Some(tail) = update.contents.take() {
                parts.push(tail);
            }
            update.contents = Some(parts.concat());
        }
        Some(update)
    }

    /// Number of URLs with an incomplete payload.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Drops every partial payload.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
