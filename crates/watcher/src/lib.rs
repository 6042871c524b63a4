//! File watching for hotpatch.
//!
//! A [`ChangeWatcher`] reports changed files, a [`Resolver`] turns each one
//! into a resource, and [`LiveReload`] pushes the result through a
//! [`hotpatch_hub::BroadcastHub`].

pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod watcher;

pub use error::WatchError;
pub use pipeline::LiveReload;
pub use resolver::{FileResolver, ResolveFuture, ResolvedResource, Resolver, normalize};
pub use watcher::{ChangeWatcher, DEFAULT_PATTERNS, WatchConfig};
