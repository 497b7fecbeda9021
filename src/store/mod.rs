//! Database capability layer.
//!
//! The bridge never talks to a concrete driver. It consumes the [`Connector`],
//! [`Client`] and [`Collection`] traits defined here; [`memory`] provides an
//! in-process implementation of the same surface.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::connection::ConnectionConfig;
use crate::error::{DocbagError, Result};
use crate::types::Document;

pub mod filter;
pub mod memory;

pub use memory::{MemoryClient, MemoryCollection, MemoryConnector};

/// Query predicate in document-database syntax. Empty matches everything.
pub type Filter = Document;

/// Lazily evaluated stream of documents returned by `find` and `aggregate`.
pub type Cursor = Box<dyn Iterator<Item = Result<Document>> + Send>;

/// One aggregation pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    /// `$match`: keep documents satisfying the filter.
    Match(Filter),
    /// `$count`: replace the stream with `{field: n}` (nothing when empty).
    Count(String),
    /// `$bucketAuto`: group `group_by` values into `buckets` even buckets.
    BucketAuto {
        /// Field expression, e.g. `"$_id"`.
        group_by: String,
        /// Requested number of buckets.
        buckets: usize,
    },
    /// `$sort`: fields in priority order.
    Sort(Vec<(String, SortOrder)>),
    /// `$limit`.
    Limit(usize),
    /// `$project`: inclusion projection.
    Project(Document),
}

impl Stage {
    /// Renders the stage in the database's wire syntax.
    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(filter) => json!({ "$match": filter }),
            Stage::Count(field) => json!({ "$count": field }),
            Stage::BucketAuto { group_by, buckets } => {
                json!({ "$bucketAuto": { "groupBy": group_by, "buckets": buckets } })
            }
            Stage::Sort(keys) => json!({ "$sort": sort_json(keys) }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Project(fields) => json!({ "$project": fields }),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Direction of one sort key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first (`1`).
    Ascending,
    /// Largest first (`-1`).
    Descending,
}

impl SortOrder {
    /// Wire value: `1` or `-1`.
    pub const fn as_i32(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

fn sort_json(keys: &[(String, SortOrder)]) -> Value {
    Value::Object(
        keys.iter()
            .map(|(field, order)| (field.clone(), Value::from(order.as_i32())))
            .collect(),
    )
}

/// Options accepted by [`Collection::find`].
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    /// Inclusion projection applied to each returned document.
    pub projection: Option<Document>,
    /// Sort keys in priority order.
    pub sort: Option<Vec<(String, SortOrder)>>,
}

/// Options accepted by [`Collection::aggregate`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregateOptions {
    /// Allow the server to spill large stages to disk.
    pub allow_disk_use: bool,
}

/// Bounds reported for one auto-bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    /// Smallest value in the bucket.
    pub min: Value,
    /// Next bucket's minimum, or the largest value for the final bucket.
    pub max: Value,
    /// Documents in the bucket.
    pub count: u64,
}

impl Bucket {
    fn from_document(doc: &Document) -> Result<Self> {
        let bounds = doc
            .get("_id")
            .and_then(Value::as_object)
            .ok_or_else(|| DocbagError::database("bucket document has no _id bounds"))?;
        let min = bounds
            .get("min")
            .cloned()
            .ok_or_else(|| DocbagError::database("bucket document has no min bound"))?;
        let max = bounds
            .get("max")
            .cloned()
            .ok_or_else(|| DocbagError::database("bucket document has no max bound"))?;
        let count = doc.get("count").and_then(Value::as_u64).unwrap_or_default();
        Ok(Self { min, max, count })
    }
}

/// Outcome of a successful bulk insert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsertManyResult {
    /// Identifiers of the inserted documents, in input order.
    pub inserted_ids: Vec<Value>,
}

/// A collection inside a database.
pub trait Collection: Send + Sync {
    /// `database.collection`, for diagnostics.
    fn namespace(&self) -> String;

    /// Collection-wide document estimate. Ignores any filter.
    fn estimated_count(&self) -> Result<u64>;

    /// Streams documents matching `filter`.
    fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Cursor>;

    /// Runs an aggregation pipeline.
    fn aggregate(&self, pipeline: &[Stage], options: &AggregateOptions) -> Result<Cursor>;

    /// Inserts `documents`, assigning an `_id` in place to each document that
    /// lacks one.
    fn insert_many(&self, documents: &mut [Document]) -> Result<InsertManyResult>;

    /// Exact number of documents matching `filter`.
    fn count(&self, filter: &Filter) -> Result<u64> {
        let pipeline = [Stage::Match(filter.clone()), Stage::Count("count".into())];
        let mut cursor = self.aggregate(&pipeline, &AggregateOptions::default())?;
        match cursor.next().transpose()? {
            Some(doc) => doc
                .get("count")
                .and_then(Value::as_u64)
                .ok_or_else(|| DocbagError::database("$count stage returned no count")),
            None => Ok(0),
        }
    }

    /// Splits matched `group_key` values into `buckets` buckets.
    fn bucket_auto(&self, filter: &Filter, group_key: &str, buckets: usize) -> Result<Vec<Bucket>> {
        let pipeline = [
            Stage::Match(filter.clone()),
            Stage::BucketAuto {
                group_by: format!("${group_key}"),
                buckets,
            },
        ];
        let options = AggregateOptions {
            allow_disk_use: true,
        };
        self.aggregate(&pipeline, &options)?
            .map(|doc| doc.and_then(|doc| Bucket::from_document(&doc)))
            .collect()
    }
}

/// An opened connection to a database deployment.
pub trait Client: Send + Sync {
    /// Resolves `database.collection`.
    fn collection(&self, database: &str, collection: &str) -> Result<Arc<dyn Collection>>;

    /// Releases the client's resources. Called at most once per client by the
    /// connection cache.
    fn close(&self);
}

/// Opens clients from connection configurations.
pub trait Connector: Send + Sync {
    /// Opens a new client. `app_name` identifies this library to the server.
    fn connect(&self, app_name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Client>>;
}
