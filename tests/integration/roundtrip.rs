use std::collections::BTreeMap;
use std::sync::Arc;

use docbag::{
    connection::ConnectionCache,
    graph::{Bag, ComputeOptions, LocalExecutor},
    io::{read_collection, write_collection},
    store::MemoryConnector,
    types::Document,
    ReadOptions, Result, WriteOptions,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn by_id(docs: Vec<Document>) -> BTreeMap<String, Document> {
    docs.into_iter()
        .map(|doc| (doc["_id"].to_string(), doc))
        .collect()
}

fn roundtrip(source: Vec<Document>, write_chunk: usize, read_chunk: usize, paginate: bool) -> Result<()> {
    let cache = Arc::new(ConnectionCache::new(Arc::new(MemoryConnector::new())));
    let executor = LocalExecutor::new(Arc::clone(&cache));
    let compute = ComputeOptions::with_workers(3);

    let bag = Bag::from_documents(source.clone(), write_chunk)?;
    write_collection(
        &bag,
        &WriteOptions::new("db", "copy").compute_options(compute),
        &executor,
    )?;
    let read = read_collection(
        &cache,
        &ReadOptions::new("db", "copy", read_chunk).paginate(paginate),
    )?;
    let back = read.compute(&executor, &compute)?;
    assert_eq!(by_id(back), by_id(source));
    Ok(())
}

fn sample(n: i64) -> Vec<Document> {
    (0..n)
        .map(|i| {
            json!({
                "_id": format!("k{i:04}"),
                "value": i * 3,
                "nested": {"even": i % 2 == 0, "label": format!("item {i}")},
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect()
}

#[test]
fn write_then_read_preserves_documents() -> Result<()> {
    for (write_chunk, read_chunk) in [(1, 50), (7, 3), (100, 100), (13, 1)] {
        roundtrip(sample(41), write_chunk, read_chunk, false)?;
        roundtrip(sample(41), write_chunk, read_chunk, true)?;
    }
    Ok(())
}

#[test]
fn generated_ids_survive_roundtrip() -> Result<()> {
    let cache = Arc::new(ConnectionCache::new(Arc::new(MemoryConnector::new())));
    let executor = LocalExecutor::new(Arc::clone(&cache));
    let docs: Vec<Document> = (0..17)
        .map(|i| json!({"seq": i}).as_object().cloned().unwrap())
        .collect();
    let bag = Bag::from_documents(docs, 4)?;
    write_collection(&bag, &WriteOptions::new("db", "gen"), &executor)?;
    let back = read_collection(&cache, &ReadOptions::new("db", "gen", 5))?
        .compute(&executor, &ComputeOptions::default())?;
    let mut seqs: Vec<i64> = back.iter().map(|d| d["seq"].as_i64().unwrap()).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..17).collect::<Vec<_>>());
    assert!(back.iter().all(|d| d["_id"].as_str().map(str::len) == Some(24)));
    Ok(())
}

#[test]
fn explicit_and_generated_ids_roundtrip() -> Result<()> {
    let docs: Vec<Document> = [
        json!({"_id": 1, "v": "a"}),
        json!({"_id": 2, "v": "b"}),
        json!({"v": "c"}),
        json!({"v": "d"}),
    ]
    .into_iter()
    .map(|doc| doc.as_object().cloned().unwrap())
    .collect();
    for paginate in [false, true] {
        let cache = Arc::new(ConnectionCache::new(Arc::new(MemoryConnector::new())));
        let executor = LocalExecutor::new(Arc::clone(&cache));
        let bag = Bag::from_documents(docs.clone(), 2)?;
        write_collection(&bag, &WriteOptions::new("db", "mixed"), &executor)?;
        let back = read_collection(&cache, &ReadOptions::new("db", "mixed", 2).paginate(paginate))?
            .compute(&executor, &ComputeOptions::default())?;
        let values: Vec<&str> = back.iter().filter_map(|d| d["v"].as_str()).collect();
        assert_eq!(values, vec!["a", "b", "c", "d"], "paginate {paginate}");
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip_any_chunking(
        values in prop::collection::btree_map(0u32..10_000, "[a-z]{0,6}", 0..80),
        write_chunk in 1usize..20,
        read_chunk in 1usize..20,
        paginate in any::<bool>(),
    ) {
        let source: Vec<Document> = values
            .into_iter()
            .map(|(id, text)| json!({"_id": id, "text": Value::String(text)}).as_object().cloned().unwrap())
            .collect();
        prop_assert!(roundtrip(source, write_chunk, read_chunk, paginate).is_ok());
    }
}
