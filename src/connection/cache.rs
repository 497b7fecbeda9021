use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::connection::hooks::{self, ExitClose};
use crate::connection::key::{ConnectionConfig, ConnectionKey};
use crate::error::{DocbagError, Result};
use crate::store::{Client, Collection, Connector};

/// Number of distinct configurations kept open by default.
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Application name reported to the database server.
pub const APP_NAME: &str = concat!("docbag/", env!("CARGO_PKG_VERSION"));

/// Shared client for one connection configuration.
///
/// Clones share the same client. The client is closed exactly once: when the
/// last clone is dropped after the cache let go of it, when the cache is torn
/// down, or at process exit. Clones inherited across a fork are discarded
/// without touching the parent's client.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    client: Arc<dyn Client>,
    key: ConnectionKey,
    generation: u64,
    closed: AtomicBool,
}

impl HandleInner {
    fn close(&self) {
        if self.generation != hooks::generation() {
            return;
        }
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(key = %self.key, "connection.handle.close");
            self.client.close();
        }
    }
}

impl ExitClose for HandleInner {
    fn close_at_exit(&self) {
        self.close();
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.close();
    }
}

impl ConnectionHandle {
    fn new(client: Arc<dyn Client>, key: ConnectionKey) -> Self {
        let inner = Arc::new(HandleInner {
            client,
            key,
            generation: hooks::generation(),
            closed: AtomicBool::new(false),
        });
        let tracked: Weak<dyn ExitClose> = Arc::downgrade(&inner) as Weak<HandleInner>;
        hooks::track(tracked);
        Self { inner }
    }

    /// Resolves `database.collection` on this connection.
    pub fn collection(&self, database: &str, collection: &str) -> Result<Arc<dyn Collection>> {
        if self.is_closed() {
            return Err(DocbagError::Connection(format!(
                "connection {} is closed",
                self.inner.key
            )));
        }
        self.inner.client.collection(database, collection)
    }

    /// Underlying driver client.
    pub fn client(&self) -> &Arc<dyn Client> {
        &self.inner.client
    }

    /// Cache key this handle was opened for.
    pub fn key(&self) -> &ConnectionKey {
        &self.inner.key
    }

    /// Whether the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether two handles share one client.
    pub fn same_client(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", &self.inner.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that opened a new client.
    pub misses: u64,
    /// Entries pushed out by the capacity bound.
    pub evictions: u64,
    /// Entries currently cached.
    pub len: usize,
    /// Capacity bound.
    pub capacity: usize,
}

/// Bounded LRU cache of open clients keyed by normalized configuration.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    entries: Mutex<LruCache<ConnectionKey, ConnectionHandle>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ConnectionCache {
    /// Creates a cache holding up to [`DEFAULT_CACHE_CAPACITY`] clients.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_capacity(connector, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache with a custom bound (minimum 1).
    pub fn with_capacity(connector: Arc<dyn Connector>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            connector,
            entries: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(hooks::generation()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the client for `config`, opening it on first use.
    ///
    /// Configurations that differ only in key order or container type share a
    /// client. Connector errors are returned unchanged. The connector runs
    /// without the cache lock held; when two threads open the same key at
    /// once, the first insert wins and the other client is closed.
    pub fn get(&self, config: &ConnectionConfig) -> Result<ConnectionHandle> {
        let key = config.key();
        if let Some(handle) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let opened = ConnectionHandle::new(self.connector.connect(APP_NAME, config)?, key.clone());

        let mut entries = self.entries.lock();
        self.reset_if_forked(&mut entries);
        if let Some(existing) = entries.get(&key).filter(|h| !h.is_closed()).cloned() {
            drop(entries);
            debug!(key = %key, "connection.cache.open_raced");
            return Ok(existing);
        }
        let evicted = entries.push(key, opened.clone());
        drop(entries);
        if let Some((evicted_key, evicted_handle)) = evicted {
            if evicted_key != *opened.key() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted_key, "connection.cache.evict");
            }
            drop(evicted_handle);
        }
        debug!(key = %opened.key(), "connection.cache.open");
        Ok(opened)
    }

    // Closed entries (after `close_all` or exit hooks) are dropped and
    // reported as a miss.
    fn lookup(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        let mut entries = self.entries.lock();
        self.reset_if_forked(&mut entries);
        match entries.peek(key).map(ConnectionHandle::is_closed) {
            Some(true) => {
                entries.pop(key);
                None
            }
            Some(false) => entries.get(key).cloned(),
            None => None,
        }
    }

    /// Closes and forgets every cached client. Runs when the cache is dropped.
    pub fn close_all(&self) {
        let drained: Vec<ConnectionHandle> = {
            let mut entries = self.entries.lock();
            let mut drained = Vec::with_capacity(entries.len());
            while let Some((_, handle)) = entries.pop_lru() {
                drained.push(handle);
            }
            drained
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "connection.cache.close_all");
        }
        for handle in &drained {
            handle.close();
        }
    }

    /// Forgets every cached client without closing it explicitly.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.reset_if_forked(&mut entries);
        entries.len()
    }

    /// Whether the cache holds no clients.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached clients.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    // Entries opened before a fork belong to the parent; the child drops them
    // without closing (see `HandleInner::close`).
    fn reset_if_forked(&self, entries: &mut LruCache<ConnectionKey, ConnectionHandle>) {
        let current = hooks::generation();
        if self.generation.swap(current, Ordering::AcqRel) != current {
            let discarded = entries.len();
            entries.clear();
            info!(discarded, "connection.cache.fork_reset");
        }
    }
}

impl Drop for ConnectionCache {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("stats", &self.stats())
            .finish()
    }
}
