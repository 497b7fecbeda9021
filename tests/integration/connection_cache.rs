use std::collections::{BTreeMap, HashMap};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use docbag::{
    connection::{ConnectionCache, ConnectionConfig, ConnectionHandle},
    store::{Client, Connector, MemoryConnector},
    Result,
};
use serde_json::{json, Value};

fn cache(capacity: usize) -> (Arc<MemoryConnector>, Arc<ConnectionCache>) {
    let connector = Arc::new(MemoryConnector::new());
    let cache = Arc::new(ConnectionCache::with_capacity(connector.clone(), capacity));
    (connector, cache)
}

#[test]
fn permuted_and_converted_configs_share_a_client() -> Result<()> {
    let (connector, cache) = cache(4);
    let built = ConnectionConfig::new()
        .with("host", "memory")
        .with("options", json!({"a": 1, "b": [1, 2]}));
    let mut hashed: HashMap<String, Value> = HashMap::new();
    hashed.insert("options".into(), json!({"b": [1, 2], "a": 1}));
    hashed.insert("host".into(), json!("memory"));
    let ordered: BTreeMap<String, Value> = hashed.clone().into_iter().collect();
    let from_json = ConnectionConfig::try_from(json!({"options": {"b": [1, 2], "a": 1}, "host": "memory"}))?;

    let first = cache.get(&built)?;
    for config in [ConnectionConfig::from(hashed), ConnectionConfig::from(ordered), from_json] {
        assert!(first.same_client(&cache.get(&config)?));
    }
    assert_eq!(connector.opened(), 1);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (3, 1));
    Ok(())
}

#[test]
fn different_settings_open_different_clients() -> Result<()> {
    let (connector, cache) = cache(4);
    let a = cache.get(&ConnectionConfig::new().with("port", 1))?;
    let b = cache.get(&ConnectionConfig::new().with("port", 1.0))?;
    let c = cache.get(&ConnectionConfig::new().with("port", 2))?;
    assert!(!a.same_client(&b));
    assert!(!a.same_client(&c));
    assert_eq!(connector.opened(), 3);
    Ok(())
}

#[test]
fn eviction_closes_unreferenced_clients_once() -> Result<()> {
    let (connector, cache) = cache(2);
    for port in 0..3 {
        cache.get(&ConnectionConfig::new().with("port", port))?;
    }
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(connector.closed(), 1);

    cache.close_all();
    assert_eq!(connector.closed(), 3);
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn evicted_client_stays_usable_while_held() -> Result<()> {
    let (connector, cache) = cache(1);
    let held = cache.get(&ConnectionConfig::new().with("port", 1))?;
    cache.get(&ConnectionConfig::new().with("port", 2))?;
    assert!(!held.is_closed());
    assert!(held.collection("db", "c").is_ok());
    assert_eq!(connector.closed(), 0);
    drop(held);
    assert_eq!(connector.closed(), 1);
    Ok(())
}

#[test]
fn close_all_marks_outstanding_handles_closed() -> Result<()> {
    let (connector, cache) = cache(4);
    let handle = cache.get(&ConnectionConfig::new())?;
    cache.close_all();
    assert!(handle.is_closed());
    assert!(handle.collection("db", "c").is_err());
    drop(handle);
    assert_eq!(connector.closed(), 1);
    Ok(())
}

#[test]
fn concurrent_lookups_share_one_cached_client() -> Result<()> {
    let (connector, cache) = cache(4);
    let config = ConnectionConfig::new().with("host", "shared");
    let handles: Vec<ConnectionHandle> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8).map(|_| scope.spawn(|| cache.get(&config))).collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("lookup thread"))
            .collect::<Result<_>>()
    })?;
    assert!(handles.iter().all(|h| h.same_client(&handles[0])));
    assert_eq!(cache.len(), 1);
    assert_eq!(connector.opened() - connector.closed(), 1, "raced clients are closed");
    Ok(())
}

// Blocks connects to host "slow" until released.
struct GatedConnector {
    inner: MemoryConnector,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Connector for GatedConnector {
    fn connect(&self, app_name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Client>> {
        if config.get("host") == Some(&json!("slow")) {
            let _ = self.entered.lock().expect("entered").send(());
            let _ = self.release.lock().expect("release").recv();
        }
        self.inner.connect(app_name, config)
    }
}

#[test]
fn slow_connect_does_not_block_other_keys() -> Result<()> {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let connector = Arc::new(GatedConnector {
        inner: MemoryConnector::new(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let cache = ConnectionCache::new(connector.clone());
    thread::scope(|scope| -> Result<()> {
        let slow = scope.spawn(|| cache.get(&ConnectionConfig::new().with("host", "slow")));
        entered_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("slow connect started");
        let fast = cache.get(&ConnectionConfig::new().with("host", "fast"))?;
        assert!(!fast.is_closed());
        release_tx.send(()).expect("release slow connect");
        slow.join().expect("slow thread")?;
        Ok(())
    })?;
    assert_eq!(cache.len(), 2);
    assert_eq!(connector.inner.opened(), 2);
    Ok(())
}

#[test]
fn refused_connections_are_not_cached() {
    let (connector, cache) = cache(4);
    connector.refuse("down");
    let config = ConnectionConfig::new().with("host", "down");
    assert!(cache.get(&config).is_err());
    assert!(cache.is_empty());
    assert!(cache.get(&config).is_err());
}
