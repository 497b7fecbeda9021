use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{DocbagError, Result};
use crate::store::{Collection, Filter, FindOptions, SortOrder};
use crate::types::{Document, ID_FIELD};

/// How the planner sizes the matched population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStrategy {
    /// Aggregation count of the documents matching the filter.
    #[default]
    Exact,
    /// Collection-wide metadata estimate. Ignores the filter entirely, so
    /// only use it with an empty filter or when the error is acceptable.
    Estimated,
}

/// How the planner derives partition boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Let the database split `_id` values into `ceil(n / chunk)` buckets.
    #[default]
    BucketAuto,
    /// Scan every matched `_id` in order and cut every `chunk` documents.
    Paginate,
}

/// Planner knobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Population sizing.
    pub count: CountStrategy,
    /// Boundary derivation.
    pub strategy: PartitionStrategy,
    /// Draw a progress bar on stderr while paginating.
    pub show_progress: bool,
}

/// Identifier range covered by one partition.
///
/// `min` is inclusive. `max` is exclusive except for the last partition of a
/// plan, where it is inclusive; this keeps a boundary document out of two
/// adjacent partitions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartitionBounds {
    /// Position of the partition in the plan.
    pub ordinal: usize,
    /// Lower `_id` bound, inclusive.
    pub min: Value,
    /// Upper `_id` bound.
    pub max: Value,
}

/// Computes disjoint `_id` ranges covering every document matching `filter`,
/// each holding roughly `chunk_size` documents.
///
/// Runs eagerly against the database. An empty match yields no partitions.
pub fn plan(
    collection: &dyn Collection,
    filter: &Filter,
    chunk_size: usize,
    options: &PlanOptions,
) -> Result<Vec<PartitionBounds>> {
    if chunk_size == 0 {
        return Err(DocbagError::invalid("chunk size must be positive"));
    }
    let total = match options.count {
        CountStrategy::Exact => collection.count(filter)?,
        CountStrategy::Estimated => collection.estimated_count()?,
    };
    let requested = usize::try_from(total.div_ceil(chunk_size as u64))
        .map_err(|_| DocbagError::invalid("partition count overflows usize"))?;
    debug!(
        namespace = %collection.namespace(),
        total,
        requested,
        count = ?options.count,
        "planner.count"
    );

    let partitions = match options.strategy {
        PartitionStrategy::BucketAuto => bucket_partitions(collection, filter, requested)?,
        PartitionStrategy::Paginate => {
            paginate_partitions(collection, filter, chunk_size, total, options.show_progress)?
        }
    };
    info!(
        namespace = %collection.namespace(),
        total,
        partitions = partitions.len(),
        strategy = ?options.strategy,
        "planner.plan.done"
    );
    Ok(partitions)
}

fn bucket_partitions(
    collection: &dyn Collection,
    filter: &Filter,
    requested: usize,
) -> Result<Vec<PartitionBounds>> {
    if requested == 0 {
        return Ok(Vec::new());
    }
    let buckets = collection.bucket_auto(filter, ID_FIELD, requested)?;
    Ok(buckets
        .into_iter()
        .enumerate()
        .map(|(ordinal, bucket)| PartitionBounds {
            ordinal,
            min: bucket.min,
            max: bucket.max,
        })
        .collect())
}

fn paginate_partitions(
    collection: &dyn Collection,
    filter: &Filter,
    chunk_size: usize,
    total: u64,
    show_progress: bool,
) -> Result<Vec<PartitionBounds>> {
    let progress = if show_progress {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{spinner} paginating ids {pos}/{len} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut projection = Document::new();
    projection.insert(ID_FIELD.into(), Value::from(1));
    let options = FindOptions {
        projection: Some(projection),
        sort: Some(vec![(ID_FIELD.to_string(), SortOrder::Ascending)]),
    };

    let mut partitions = Vec::new();
    let mut lower: Option<Value> = None;
    let mut last: Option<Value> = None;
    for (idx, doc) in collection.find(filter, &options)?.enumerate() {
        let doc = doc?;
        let id = doc.get(ID_FIELD).cloned().ok_or_else(|| {
            DocbagError::database(format!("document at scan position {idx} has no _id"))
        })?;
        if idx == 0 {
            lower = Some(id.clone());
        } else if idx % chunk_size == 0 {
            if let Some(min) = lower.replace(id.clone()) {
                partitions.push(PartitionBounds {
                    ordinal: partitions.len(),
                    min,
                    max: id.clone(),
                });
            }
        }
        last = Some(id);
        progress.inc(1);
    }
    if let (Some(min), Some(max)) = (lower, last) {
        partitions.push(PartitionBounds {
            ordinal: partitions.len(),
            min,
            max,
        });
    }
    progress.finish_and_clear();
    Ok(partitions)
}
