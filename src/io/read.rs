use tracing::info;

use crate::config::ReadOptions;
use crate::connection::ConnectionCache;
use crate::error::{DocbagError, Result};
use crate::graph::{Bag, Task, TaskGraph, TaskKey, Tokenizer};
use crate::partition::{plan, FetchArgs};

/// Deterministic layer name for a read: `read-<token>`.
///
/// The token covers the normalized connection key, the namespace, the match
/// filter and the chunk size, so identical reads share a name.
pub fn read_graph_name(options: &ReadOptions) -> String {
    let token = Tokenizer::new()
        .frozen(options.connection.key().frozen())
        .str(&options.database)
        .str(&options.collection)
        .document(&options.filter)
        .u64(options.chunk_size as u64)
        .finish();
    format!("read-{token}")
}

/// Plans the read eagerly and returns a bag with one fetch task per
/// partition. No documents are loaded until the bag is computed.
pub fn build_read_graph(cache: &ConnectionCache, options: &ReadOptions) -> Result<Bag> {
    let handle = cache.get(&options.connection)?;
    let collection = handle.collection(&options.database, &options.collection)?;
    let partitions = plan(
        collection.as_ref(),
        &options.filter,
        options.chunk_size,
        &options.plan_options(),
    )?;

    let name = read_graph_name(options);
    let npartitions = partitions.len();
    let mut graph = TaskGraph::new();
    for bounds in partitions {
        let include_last = bounds.ordinal + 1 == npartitions;
        graph.insert(
            TaskKey::new(&name, bounds.ordinal),
            Task::Fetch(FetchArgs {
                connection: options.connection.clone(),
                database: options.database.clone(),
                collection: options.collection.clone(),
                filter: options.filter.clone(),
                id_min: bounds.min,
                id_max: bounds.max,
                include_last,
            }),
        );
    }
    Ok(Bag::new(graph, name, npartitions))
}

/// Reads `options.database.options.collection` as a partitioned bag.
pub fn read_collection(cache: &ConnectionCache, options: &ReadOptions) -> Result<Bag> {
    if options.database.is_empty() || options.collection.is_empty() {
        return Err(DocbagError::invalid(
            "database and collection names must be non-empty",
        ));
    }
    let bag = build_read_graph(cache, options)?;
    info!(
        bag = bag.name(),
        partitions = bag.npartitions(),
        chunk_size = options.chunk_size,
        "read.collection"
    );
    Ok(bag)
}
