//! In-process document store implementing the capability traits.
//!
//! Clients opened for the same `host` setting share one cluster, so data
//! written through one connection is visible through every other. Documents
//! are kept ordered by `_id`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use crate::connection::ConnectionConfig;
use crate::error::{DocbagError, Result};
use crate::store::filter::{lookup, matches};
use crate::store::{
    AggregateOptions, Client, Collection, Connector, Cursor, Filter, FindOptions,
    InsertManyResult, SortOrder, Stage,
};
use crate::types::{compare_values, Document, ObjectId, OrderedValue, ID_FIELD};

/// Host used when a configuration has no `host` setting.
pub const DEFAULT_HOST: &str = "memory";

#[derive(Default)]
struct ConnectorCounters {
    opened: AtomicU64,
    closed: AtomicU64,
}

/// Opens [`MemoryClient`]s. Keeps every cluster alive for its own lifetime.
#[derive(Default)]
pub struct MemoryConnector {
    clusters: Mutex<HashMap<String, Arc<Cluster>>>,
    refused: Mutex<HashSet<String>>,
    counters: Arc<ConnectorCounters>,
}

impl MemoryConnector {
    /// Creates a connector with no clusters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to a collection, bypassing clients.
    pub fn collection(&self, host: &str, database: &str, collection: &str) -> Arc<MemoryCollection> {
        self.cluster(host).collection(database, collection)
    }

    /// Makes future connections to `host` fail.
    pub fn refuse(&self, host: &str) {
        self.refused.lock().insert(host.to_string());
    }

    /// Clients opened so far.
    pub fn opened(&self) -> u64 {
        self.counters.opened.load(Ordering::Relaxed)
    }

    /// Clients closed so far.
    pub fn closed(&self) -> u64 {
        self.counters.closed.load(Ordering::Relaxed)
    }

    fn cluster(&self, host: &str) -> Arc<Cluster> {
        self.clusters
            .lock()
            .entry(host.to_string())
            .or_default()
            .clone()
    }
}

fn host_of(config: &ConnectionConfig) -> Result<String> {
    match config.get("host") {
        None => Ok(DEFAULT_HOST.to_string()),
        Some(Value::String(host)) => Ok(host.clone()),
        Some(other) => Err(DocbagError::Connection(format!(
            "host must be a string, got {other}"
        ))),
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, app_name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Client>> {
        let host = host_of(config)?;
        if self.refused.lock().contains(&host) {
            return Err(DocbagError::Connection(format!(
                "connection refused by {host}"
            )));
        }
        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryClient {
            cluster: self.cluster(&host),
            host,
            app_name: app_name.to_string(),
            closed: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }
}

#[derive(Default)]
struct Cluster {
    collections: RwLock<HashMap<(String, String), Arc<MemoryCollection>>>,
}

impl Cluster {
    fn collection(&self, database: &str, collection: &str) -> Arc<MemoryCollection> {
        let key = (database.to_string(), collection.to_string());
        if let Some(found) = self.collections.read().get(&key) {
            return found.clone();
        }
        self.collections
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryCollection::new(format!("{database}.{collection}"))))
            .clone()
    }
}

/// Client connected to one in-memory cluster.
pub struct MemoryClient {
    cluster: Arc<Cluster>,
    host: String,
    app_name: String,
    closed: AtomicBool,
    counters: Arc<ConnectorCounters>,
}

impl MemoryClient {
    /// Host this client is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Application name announced at connect time.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Client for MemoryClient {
    fn collection(&self, database: &str, collection: &str) -> Result<Arc<dyn Collection>> {
        if self.is_closed() {
            return Err(DocbagError::Connection(format!(
                "client for {} is closed",
                self.host
            )));
        }
        Ok(self.cluster.collection(database, collection))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Collection stored in memory, ordered by `_id`.
pub struct MemoryCollection {
    namespace: String,
    documents: RwLock<BTreeMap<OrderedValue, Document>>,
    insert_calls: AtomicU64,
}

impl MemoryCollection {
    fn new(namespace: String) -> Self {
        Self {
            namespace,
            documents: RwLock::new(BTreeMap::new()),
            insert_calls: AtomicU64::new(0),
        }
    }

    /// Number of `insert_many` calls received.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    /// Copy of every stored document, in `_id` order.
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().values().cloned().collect()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, filter: Option<&Filter>) -> Result<Vec<Document>> {
        let documents = self.documents.read();
        let mut out = Vec::new();
        for doc in documents.values() {
            let keep = match filter {
                Some(filter) => matches(doc, filter)?,
                None => true,
            };
            if keep {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

impl Collection for MemoryCollection {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    fn estimated_count(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Cursor> {
        let mut docs = self.snapshot(Some(filter))?;
        if let Some(keys) = &options.sort {
            sort_documents(&mut docs, keys);
        }
        if let Some(projection) = &options.projection {
            docs = docs
                .into_iter()
                .map(|doc| project(doc, projection))
                .collect::<Result<_>>()?;
        }
        Ok(Box::new(docs.into_iter().map(Ok)))
    }

    fn aggregate(&self, pipeline: &[Stage], options: &AggregateOptions) -> Result<Cursor> {
        trace!(
            namespace = %self.namespace,
            stages = pipeline.len(),
            allow_disk_use = options.allow_disk_use,
            "memory.aggregate"
        );
        let (mut docs, rest) = match pipeline.split_first() {
            Some((Stage::Match(filter), rest)) => (self.snapshot(Some(filter))?, rest),
            _ => (self.snapshot(None)?, pipeline),
        };
        for stage in rest {
            docs = apply_stage(docs, stage)?;
        }
        Ok(Box::new(docs.into_iter().map(Ok)))
    }

    fn insert_many(&self, documents: &mut [Document]) -> Result<InsertManyResult> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if documents.is_empty() {
            return Err(DocbagError::database("documents must be a non-empty list"));
        }
        let mut stored = self.documents.write();
        let mut inserted_ids = Vec::with_capacity(documents.len());
        for (idx, doc) in documents.iter_mut().enumerate() {
            let id = doc
                .entry(ID_FIELD)
                .or_insert_with(|| ObjectId::new().into())
                .clone();
            let key = OrderedValue(id.clone());
            if stored.contains_key(&key) {
                return Err(DocbagError::BulkWrite {
                    inserted: idx,
                    message: format!(
                        "duplicate key error collection: {} _id: {id}",
                        self.namespace
                    ),
                });
            }
            stored.insert(key, doc.clone());
            inserted_ids.push(id);
        }
        Ok(InsertManyResult { inserted_ids })
    }
}

fn apply_stage(docs: Vec<Document>, stage: &Stage) -> Result<Vec<Document>> {
    match stage {
        Stage::Match(filter) => {
            let mut kept = Vec::with_capacity(docs.len());
            for doc in docs {
                if matches(&doc, filter)? {
                    kept.push(doc);
                }
            }
            Ok(kept)
        }
        Stage::Count(field) => {
            if docs.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field.clone(), Value::from(docs.len() as u64));
            Ok(vec![out])
        }
        Stage::BucketAuto { group_by, buckets } => bucket_auto(&docs, group_by, *buckets),
        Stage::Sort(keys) => {
            let mut docs = docs;
            sort_documents(&mut docs, keys);
            Ok(docs)
        }
        Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
        Stage::Project(fields) => docs.into_iter().map(|doc| project(doc, fields)).collect(),
    }
}

fn sort_documents(docs: &mut [Document], keys: &[(String, SortOrder)]) {
    docs.sort_by(|a, b| {
        for (field, order) in keys {
            let left = lookup(a, field).unwrap_or(&Value::Null);
            let right = lookup(b, field).unwrap_or(&Value::Null);
            let ord = match order {
                SortOrder::Ascending => compare_values(left, right),
                SortOrder::Descending => compare_values(right, left),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
}

fn project(doc: Document, fields: &Document) -> Result<Document> {
    let include_id = fields.get(ID_FIELD).map_or(true, truthy);
    let mut out = Document::new();
    for (field, flag) in fields {
        if field == ID_FIELD {
            continue;
        }
        if !truthy(flag) {
            return Err(DocbagError::UnsupportedFilter(format!(
                "exclusion projection on {field}"
            )));
        }
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    if include_id {
        if let Some(id) = doc.get(ID_FIELD) {
            out.insert(ID_FIELD.to_string(), id.clone());
        }
    }
    Ok(out)
}

fn truthy(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

// Buckets hold near-equal counts; equal values never straddle two buckets.
// Each bucket's max is the next bucket's min, except for the last bucket.
fn bucket_auto(docs: &[Document], group_by: &str, buckets: usize) -> Result<Vec<Document>> {
    let path = group_by.strip_prefix('$').ok_or_else(|| {
        DocbagError::UnsupportedFilter(format!("groupBy must be a field path, got {group_by}"))
    })?;
    if buckets == 0 {
        return Err(DocbagError::database(
            "$bucketAuto requires a positive 'buckets' value",
        ));
    }
    let mut values: Vec<Value> = docs
        .iter()
        .map(|doc| lookup(doc, path).cloned().unwrap_or(Value::Null))
        .collect();
    values.sort_by(compare_values);

    let n = values.len();
    let base = n / buckets;
    let extra = n % buckets;
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < n {
        let want = (base + usize::from(ranges.len() < extra)).max(1);
        let mut end = (start + want).min(n);
        while end < n && compare_values(&values[end - 1], &values[end]).is_eq() {
            end += 1;
        }
        ranges.push((start, end));
        start = end;
    }

    let mut out = Vec::with_capacity(ranges.len());
    for (idx, &(start, end)) in ranges.iter().enumerate() {
        let max = match ranges.get(idx + 1) {
            Some(&(next_start, _)) => values[next_start].clone(),
            None => values[end - 1].clone(),
        };
        let mut bounds = Document::new();
        bounds.insert("min".into(), values[start].clone());
        bounds.insert("max".into(), max);
        let mut bucket = Document::new();
        bucket.insert(ID_FIELD.into(), Value::Object(bounds));
        bucket.insert("count".into(), Value::from((end - start) as u64));
        out.push(bucket);
    }
    Ok(out)
}
