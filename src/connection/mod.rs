//! Connection configuration, normalization and the shared client cache.
//!
//! Every partition task asks the [`ConnectionCache`] for its client instead of
//! opening one, so a graph with thousands of partitions reuses a handful of
//! connections.

mod cache;
pub mod hooks;
mod key;

pub use cache::{CacheStats, ConnectionCache, ConnectionHandle, APP_NAME, DEFAULT_CACHE_CAPACITY};
pub use key::{ConnectionConfig, ConnectionKey, FrozenValue};
