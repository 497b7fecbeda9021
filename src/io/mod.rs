//! Read and write entry points.

mod read;
mod write;

pub use read::{build_read_graph, read_collection, read_graph_name};
pub use write::{build_write_graph, write_collection, write_partition, WriteArgs};
