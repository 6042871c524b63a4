pub mod codec;
pub mod constants;
pub mod error;
pub mod matching;
pub mod message;

// Re-export primary types for convenience.
pub use codec::{Reassembler, decode, encode, split};
pub use error::ProtocolError;
pub use matching::{MatchKind, MatchSpec, RegexFlags};
pub use message::{Message, ResourceUpdate};
