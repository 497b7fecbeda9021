//! Docbag moves documents between a document database and partitioned,
//! lazily evaluated bags.
//!
//! Reads plan `_id` ranges up front and turn each range into a fetch task;
//! writes add one insert task per partition behind a single checkpoint.
//! Connections are shared through a process-wide [`connection::ConnectionCache`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use docbag::{
//!     connection::ConnectionCache, graph::{ComputeOptions, LocalExecutor},
//!     io::{read_collection, write_collection}, store::MemoryConnector,
//!     ReadOptions, WriteOptions,
//! };
//!
//! # fn main() -> docbag::Result<()> {
//! let cache = Arc::new(ConnectionCache::new(Arc::new(MemoryConnector::new())));
//! let executor = LocalExecutor::new(Arc::clone(&cache));
//! let bag = read_collection(&cache, &ReadOptions::new("shop", "orders", 500))?;
//! write_collection(&bag, &WriteOptions::new("shop", "orders_copy"), &executor)?;
//! let docs = bag.compute(&executor, &ComputeOptions::default())?;
//! # let _ = docs;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod graph;
pub mod io;
pub mod logging;
pub mod partition;
pub mod store;
pub mod types;

pub use config::{BridgeConfig, ReadOptions, WriteOptions};
pub use error::{DocbagError, Result};
pub use graph::{Bag, Delayed};
