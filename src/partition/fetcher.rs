use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::connection::{ConnectionCache, ConnectionConfig};
use crate::error::Result;
use crate::store::{AggregateOptions, Filter, Stage};
use crate::types::{type_rank, Document, ID_FIELD, TYPE_ALIASES};

/// Everything one partition task needs to load its documents.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchArgs {
    /// Connection settings, resolved through the connection cache.
    pub connection: ConnectionConfig,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Match filter shared with the planner.
    pub filter: Filter,
    /// Lower `_id` bound, inclusive.
    pub id_min: Value,
    /// Upper `_id` bound.
    pub id_max: Value,
    /// Whether `id_max` is inclusive (last partition only).
    pub include_last: bool,
}

/// `_id` range `[min, max)`, or `[min, max]` for the last partition.
///
/// Range operators only compare values of the same type, so when the bounds
/// differ in type the range is split into the tail of `min`'s type, every
/// type ranked strictly between, and the head of `max`'s type.
pub fn range_filter(id_min: &Value, id_max: &Value, include_last: bool) -> Filter {
    let upper = if include_last { "$lte" } else { "$lt" };
    let (low_rank, high_rank) = (type_rank(id_min), type_rank(id_max));
    if low_rank == high_rank {
        let mut bounds = serde_json::Map::new();
        bounds.insert("$gte".into(), id_min.clone());
        bounds.insert(upper.into(), id_max.clone());
        return id_condition(Value::Object(bounds));
    }
    let mut clauses = vec![Value::Object(id_condition(json!({ "$gte": id_min })))];
    let between: Vec<&str> = TYPE_ALIASES
        .iter()
        .enumerate()
        .filter(|(rank, _)| *rank > usize::from(low_rank) && *rank < usize::from(high_rank))
        .map(|(_, alias)| *alias)
        .collect();
    if !between.is_empty() {
        clauses.push(Value::Object(id_condition(json!({ "$type": between }))));
    }
    let mut head = serde_json::Map::new();
    head.insert(upper.into(), id_max.clone());
    clauses.push(Value::Object(id_condition(Value::Object(head))));
    let mut filter = Filter::new();
    filter.insert("$or".into(), Value::Array(clauses));
    filter
}

fn id_condition(condition: Value) -> Filter {
    let mut filter = Filter::new();
    filter.insert(ID_FIELD.into(), condition);
    filter
}

/// Loads one partition: the match filter, then the `_id` range.
///
/// The two conditions run as separate, ordered `$match` stages rather than a
/// merged predicate. The whole partition is materialized in memory; callers
/// choose a chunk size whose partitions fit.
pub fn fetch_partition(cache: &ConnectionCache, args: &FetchArgs) -> Result<Vec<Document>> {
    let handle = cache.get(&args.connection)?;
    let collection = handle.collection(&args.database, &args.collection)?;
    let pipeline = [
        Stage::Match(args.filter.clone()),
        Stage::Match(range_filter(&args.id_min, &args.id_max, args.include_last)),
    ];
    let documents = collection
        .aggregate(&pipeline, &AggregateOptions::default())?
        .collect::<Result<Vec<_>>>()?;
    debug!(
        namespace = %collection.namespace(),
        range = %json!([&args.id_min, &args.id_max]),
        include_last = args.include_last,
        documents = documents.len(),
        "fetch.partition"
    );
    Ok(documents)
}
