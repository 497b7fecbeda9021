use std::collections::BTreeSet;
use std::sync::Arc;

use docbag::{
    connection::{ConnectionCache, ConnectionConfig},
    graph::{ComputeOptions, LocalExecutor},
    io::read_collection,
    store::{memory::DEFAULT_HOST, Collection, MemoryCollection, MemoryConnector},
    types::{compare_values, Document},
    ReadOptions, Result,
};
use proptest::prelude::*;
use serde_json::{json, Value};

struct Fixture {
    connector: Arc<MemoryConnector>,
    cache: Arc<ConnectionCache>,
    executor: LocalExecutor,
}

impl Fixture {
    fn new() -> Self {
        let connector = Arc::new(MemoryConnector::new());
        let cache = Arc::new(ConnectionCache::new(connector.clone()));
        let executor = LocalExecutor::new(Arc::clone(&cache));
        Self {
            connector,
            cache,
            executor,
        }
    }

    fn seed(&self, collection: &str, docs: Vec<Value>) -> Arc<MemoryCollection> {
        let coll = self.connector.collection(DEFAULT_HOST, "db", collection);
        let mut docs: Vec<Document> = docs
            .into_iter()
            .map(|doc| doc.as_object().cloned().expect("object"))
            .collect();
        if !docs.is_empty() {
            coll.insert_many(&mut docs).expect("seed");
        }
        coll
    }

    fn partitions(&self, options: &ReadOptions) -> Result<Vec<Vec<Document>>> {
        let bag = read_collection(&self.cache, options)?;
        bag.compute_partitions(&self.executor, &ComputeOptions::with_workers(4))
    }
}

fn numbered(n: i64) -> Vec<Value> {
    (0..n).map(|i| json!({"_id": i, "group": i % 4})).collect()
}

fn ids(partitions: &[Vec<Document>]) -> Vec<Value> {
    partitions
        .iter()
        .flatten()
        .map(|doc| doc["_id"].clone())
        .collect()
}

fn assert_disjoint_cover(partitions: &[Vec<Document>], expected: usize) {
    let all = ids(partitions);
    assert_eq!(all.len(), expected, "every matched document appears once");
    let unique: BTreeSet<String> = all.iter().map(Value::to_string).collect();
    assert_eq!(unique.len(), expected, "no document appears twice");
}

#[test]
fn bucket_read_covers_collection_in_order() -> Result<()> {
    let fx = Fixture::new();
    fx.seed("items", numbered(95));
    let parts = fx.partitions(&ReadOptions::new("db", "items", 10))?;
    assert_eq!(parts.len(), 10);
    assert_disjoint_cover(&parts, 95);
    let flat = ids(&parts);
    assert!(flat
        .windows(2)
        .all(|pair| compare_values(&pair[0], &pair[1]).is_lt()));
    Ok(())
}

#[test]
fn paginate_read_has_exact_chunks() -> Result<()> {
    let fx = Fixture::new();
    fx.seed("items", numbered(47));
    let parts = fx.partitions(&ReadOptions::new("db", "items", 10).paginate(true))?;
    let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 10, 10, 7]);
    Ok(())
}

#[test]
fn filtered_read_returns_only_matches() -> Result<()> {
    let fx = Fixture::new();
    fx.seed("items", numbered(60));
    let filter = json!({"group": {"$in": [1, 3]}}).as_object().cloned().unwrap();
    for paginate in [false, true] {
        let options = ReadOptions::new("db", "items", 7)
            .filter(filter.clone())
            .paginate(paginate);
        let parts = fx.partitions(&options)?;
        assert_eq!(parts.len(), 5);
        assert_disjoint_cover(&parts, 30);
        assert!(parts
            .iter()
            .flatten()
            .all(|doc| doc["group"] == json!(1) || doc["group"] == json!(3)));
    }
    Ok(())
}

#[test]
fn generated_object_ids_partition_cleanly() -> Result<()> {
    let fx = Fixture::new();
    let coll = fx.seed("events", (0..33).map(|i| json!({"seq": i})).collect());
    assert!(coll.documents().iter().all(|doc| doc["_id"].is_string()));
    let parts = fx.partitions(&ReadOptions::new("db", "events", 8))?;
    assert_eq!(parts.len(), 5);
    assert_disjoint_cover(&parts, 33);
    Ok(())
}

#[test]
fn mixed_id_types_are_all_read() -> Result<()> {
    let fx = Fixture::new();
    fx.seed(
        "mixed",
        vec![
            json!({"_id": 1}),
            json!({"_id": 2.5}),
            json!({"_id": "user-7"}),
            json!({"_id": {"region": "eu"}}),
            json!({"_id": null}),
            json!({"v": "c"}),
            json!({"v": "d"}),
        ],
    );
    for paginate in [false, true] {
        for chunk in 1..=7 {
            let options = ReadOptions::new("db", "mixed", chunk).paginate(paginate);
            let parts = fx.partitions(&options)?;
            assert_disjoint_cover(&parts, 7);
            let flat = ids(&parts);
            assert!(
                flat.windows(2)
                    .all(|pair| compare_values(&pair[0], &pair[1]).is_lt()),
                "chunk {chunk}, paginate {paginate}: {flat:?}"
            );
        }
    }
    Ok(())
}

#[test]
fn empty_match_yields_empty_bag() -> Result<()> {
    let fx = Fixture::new();
    fx.seed("items", numbered(10));
    let filter = json!({"group": 99}).as_object().cloned().unwrap();
    let bag = read_collection(&fx.cache, &ReadOptions::new("db", "items", 3).filter(filter))?;
    assert_eq!(bag.npartitions(), 0);
    assert!(bag.compute(&fx.executor, &ComputeOptions::default())?.is_empty());

    let missing = read_collection(&fx.cache, &ReadOptions::new("db", "nothing", 3))?;
    assert_eq!(missing.npartitions(), 0);
    Ok(())
}

#[test]
fn estimated_count_still_covers_filtered_set() -> Result<()> {
    let fx = Fixture::new();
    fx.seed("items", numbered(40));
    let filter = json!({"group": 2}).as_object().cloned().unwrap();
    let options = ReadOptions::new("db", "items", 10)
        .filter(filter)
        .estimated_count(true);
    let parts = fx.partitions(&options)?;
    assert_disjoint_cover(&parts, 10);
    Ok(())
}

#[test]
fn connection_settings_select_the_cluster() -> Result<()> {
    let fx = Fixture::new();
    fx.connector
        .collection("replica", "db", "items")
        .insert_many(&mut vec![json!({"_id": 1}).as_object().cloned().unwrap()])?;
    let options = ReadOptions::new("db", "items", 10)
        .connection(ConnectionConfig::new().with("host", "replica"));
    assert_eq!(ids(&fx.partitions(&options)?), vec![json!(1)]);
    assert!(fx.partitions(&ReadOptions::new("db", "items", 10))?.is_empty());
    Ok(())
}

#[test]
fn zero_chunk_size_is_rejected() {
    let fx = Fixture::new();
    fx.seed("items", numbered(3));
    assert!(read_collection(&fx.cache, &ReadOptions::new("db", "items", 0)).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn partitions_cover_matches_exactly(
        id_set in prop::collection::btree_set(-500i64..500, 0..120),
        chunk in 1usize..40,
        paginate in any::<bool>(),
        modulus in 1i64..4,
    ) {
        let fx = Fixture::new();
        let docs = id_set
            .iter()
            .map(|i| json!({"_id": i, "bucket": i.rem_euclid(modulus)}))
            .collect();
        fx.seed("items", docs);
        let filter = json!({"bucket": 0}).as_object().cloned().unwrap();
        let expected: Vec<Value> = id_set
            .iter()
            .filter(|i| i.rem_euclid(modulus) == 0)
            .map(|i| json!(i))
            .collect();

        let options = ReadOptions::new("db", "items", chunk).filter(filter).paginate(paginate);
        let parts = fx.partitions(&options).unwrap();
        prop_assert_eq!(parts.len(), expected.len().div_ceil(chunk));
        prop_assert_eq!(ids(&parts), expected);
        if paginate {
            if let Some((_, full)) = parts.split_last() {
                prop_assert!(full.iter().all(|p| p.len() == chunk));
            }
        }
    }

    #[test]
    fn mixed_type_ids_cover_collection(
        numbers in prop::collection::btree_set(-50i64..50, 0..30),
        names in prop::collection::btree_set("[a-z]{1,4}", 0..30),
        generated in 0usize..10,
        chunk in 1usize..12,
        paginate in any::<bool>(),
    ) {
        let fx = Fixture::new();
        let docs: Vec<Value> = numbers
            .iter()
            .map(|n| json!({"_id": n}))
            .chain(names.iter().map(|s| json!({"_id": s})))
            .chain((0..generated).map(|i| json!({"seq": i})))
            .collect();
        let total = docs.len();
        fx.seed("items", docs);

        let options = ReadOptions::new("db", "items", chunk).paginate(paginate);
        let parts = fx.partitions(&options).unwrap();
        let flat = ids(&parts);
        prop_assert_eq!(flat.len(), total);
        prop_assert!(flat
            .windows(2)
            .all(|pair| compare_values(&pair[0], &pair[1]).is_lt()));
    }
}
