use serde::Serialize;
use tracing::{debug, info};

use crate::config::WriteOptions;
use crate::connection::{ConnectionCache, ConnectionConfig};
use crate::error::Result;
use crate::graph::{Bag, ComputeOptions, Delayed, Executor, Task, TaskKey, Tokenizer};
use crate::types::Document;

/// Destination of one write task.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WriteArgs {
    /// Connection settings, resolved through the connection cache.
    pub connection: ConnectionConfig,
    /// Destination database.
    pub database: String,
    /// Destination collection.
    pub collection: String,
}

/// Inserts one partition's documents and returns how many were written.
///
/// The driver assigns `_id` values in place, so it receives copies and
/// `documents` is never modified. An empty partition issues no insert.
pub fn write_partition(
    cache: &ConnectionCache,
    args: &WriteArgs,
    documents: &[Document],
) -> Result<usize> {
    if documents.is_empty() {
        debug!(
            database = %args.database,
            collection = %args.collection,
            "write.partition.skip_empty"
        );
        return Ok(0);
    }
    let handle = cache.get(&args.connection)?;
    let collection = handle.collection(&args.database, &args.collection)?;
    let mut copies = documents.to_vec();
    let result = collection.insert_many(&mut copies)?;
    debug!(
        namespace = %collection.namespace(),
        inserted = result.inserted_ids.len(),
        "write.partition"
    );
    Ok(result.inserted_ids.len())
}

fn write_layer_name(bag: &Bag, options: &WriteOptions) -> String {
    let token = Tokenizer::new()
        .str(bag.name())
        .frozen(options.connection.key().frozen())
        .str(&options.database)
        .str(&options.collection)
        .finish();
    format!("write-{token}")
}

/// Writes every partition of `bag` into `options.database.options.collection`.
///
/// One write task is added per partition, behind a single checkpoint that
/// completes once all of them have. With `options.compute` the checkpoint is
/// executed now and `None` is returned; otherwise the deferred checkpoint is
/// returned for the caller to compute later.
pub fn write_collection(
    bag: &Bag,
    options: &WriteOptions,
    executor: &dyn Executor,
) -> Result<Option<Delayed>> {
    let delayed = build_write_graph(bag, options);
    if !options.compute {
        return Ok(Some(delayed));
    }
    run_writes(&delayed, executor, &options.compute_options)?;
    Ok(None)
}

/// Extends `bag`'s graph with the write fan-out and its checkpoint.
pub fn build_write_graph(bag: &Bag, options: &WriteOptions) -> Delayed {
    let name = write_layer_name(bag, options);
    let args = WriteArgs {
        connection: options.connection.clone(),
        database: options.database.clone(),
        collection: options.collection.clone(),
    };
    let mut graph = bag.graph().clone();
    let mut writes = Vec::with_capacity(bag.npartitions());
    for input in bag.keys() {
        let key = TaskKey::new(&name, input.index);
        graph.insert(
            key.clone(),
            Task::Write {
                input,
                args: args.clone(),
            },
        );
        writes.push(key);
    }
    let barrier = TaskKey::new(format!("checkpoint-{name}"), 0);
    graph.insert(barrier.clone(), Task::Checkpoint { inputs: writes });
    Delayed::new(graph, barrier)
}

fn run_writes(delayed: &Delayed, executor: &dyn Executor, options: &ComputeOptions) -> Result<()> {
    delayed.compute(executor, options)?;
    info!(barrier = %delayed.key(), "write.collection.done");
    Ok(())
}
