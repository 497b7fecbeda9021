//! Read-side partitioning: planning `_id` ranges and fetching them.

mod fetcher;
mod planner;

pub use fetcher::{fetch_partition, range_filter, FetchArgs};
pub use planner::{plan, CountStrategy, PartitionBounds, PartitionStrategy, PlanOptions};
