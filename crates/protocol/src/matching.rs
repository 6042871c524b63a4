//! Resource matchers.
//!
//! [`MatchKind`] is the closed wire vocabulary carried in the `match` field
//! of an update frame. [`MatchSpec`] is the resolved form the client
//! evaluates against page resource URLs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Flags carried alongside a regular expression source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    /// Accepted for compatibility, has no effect on a single match test.
    pub global: bool,
    pub multiline: bool,
    pub ignore_case: bool,
}

/// Matcher as it appears on the wire.
///
/// Serialized as `"indexOf"`, `"equal"` or
/// `{"type":"regexp","source":..,"global":..,"multiline":..,"ignoreCase":..}`.
/// Every other shape, including function source text, is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum MatchKind {
    IndexOf,
    Equal,
    Regexp { source: String, flags: RegexFlags },
}

impl MatchKind {
    /// Builds a regexp matcher with default flags.
    pub fn regexp(source: impl Into<String>) -> Self {
        Self::Regexp {
            source: source.into(),
            flags: RegexFlags::default(),
        }
    }
}

impl From<MatchKind> for Value {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::IndexOf => Value::String("indexOf".into()),
            MatchKind::Equal => Value::String("equal".into()),
            MatchKind::Regexp { source, flags } => {
                let mut map = Map::new();
                map.insert("type".into(), Value::String("regexp".into()));
                map.insert("source".into(), Value::String(source));
                map.insert("global".into(), Value::Bool(flags.global));
                map.insert("multiline".into(), Value::Bool(flags.multiline));
                map.insert("ignoreCase".into(), Value::Bool(flags.ignore_case));
                Value::Object(map)
            }
        }
    }
}

impl TryFrom<Value> for MatchKind {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => match name.as_str() {
                "indexOf" => Ok(Self::IndexOf),
                "equal" => Ok(Self::Equal),
                other => Err(ProtocolError::UnsupportedMatcher(other.to_string())),
            },
            Value::Object(map) => {
                match map.get("type").and_then(Value::as_str) {
                    Some("regexp") => {}
                    Some(other) => {
                        return Err(ProtocolError::UnsupportedMatcher(format!(
                            "object of type `{other}`"
                        )));
                    }
                    None => {
                        return Err(ProtocolError::UnsupportedMatcher(
                            "object without a type".into(),
                        ));
                    }
                }
                let source = map
                    .get("source")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ProtocolError::UnsupportedMatcher("regexp without a string source".into())
                    })?
                    .to_string();
                let flag = |name: &str| map.get(name).and_then(Value::as_bool).unwrap_or(false);
                Ok(Self::Regexp {
                    source,
                    flags: RegexFlags {
                        global: flag("global"),
                        multiline: flag("multiline"),
                        ignore_case: flag("ignoreCase"),
                    },
                })
            }
            other => Err(ProtocolError::UnsupportedMatcher(other.to_string())),
        }
    }
}

/// Resolved matcher, evaluated by the client against resource URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSpec {
    /// URL contains the needle.
    Substring(String),
    /// URL equals the value.
    Exact(String),
    /// URL matches the pattern.
    Regex { source: String, flags: RegexFlags },
}

impl MatchSpec {
    /// Resolves a wire matcher for an update addressed to `resource_url`.
    ///
    /// A missing matcher behaves like `indexOf`.
    pub fn resolve(kind: Option<&MatchKind>, resource_url: &str) -> Self {
        match kind {
            None | Some(MatchKind::IndexOf) => Self::Substring(resource_url.to_string()),
            Some(MatchKind::Equal) => Self::Exact(resource_url.to_string()),
            Some(MatchKind::Regexp { source, flags }) => Self::Regex {
                source: source.clone(),
                flags: *flags,
            },
        }
    }
}
