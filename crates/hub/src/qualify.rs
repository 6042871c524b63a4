//! Resource URL qualification against a client's page base URL.

use hotpatch_protocol::Message;
use url::Url;

/// Makes `resource_url` absolute relative to `base`.
///
/// URLs that already parse as absolute are returned unchanged, so a
/// qualified URL is never prefixed twice.
pub fn qualify(resource_url: &str, base: &Url) -> String {
    if Url::parse(resource_url).is_ok() {
        return resource_url.to_string();
    }
    match base.join(resource_url) {
        Ok(joined) => joined.into(),
        Err(e) => {
            tracing::warn!(resource_url, base = %base, "cannot qualify resource URL: {e}");
            resource_url.to_string()
        }
    }
}

/// Returns `message` with its resource URL qualified for one connection.
///
/// Messages without a resource URL, or connections without a base URL,
/// are returned as is.
pub fn personalize(message: &Message, base: Option<&Url>) -> Message {
    let Some(base) = base else {
        return message.clone();
    };
    match message {
        Message::Update(update) | Message::Sync(update) => {
            let mut update = update.clone();
            update.resource_url = qualify(&update.resource_url, base);
            match message {
                Message::Sync(_) => Message::Sync(update),
                _ => Message::Update(update),
            }
        }
        other => other.clone(),
    }
}
