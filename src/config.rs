//! Configuration: per-call read/write options and the on-disk bridge config.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionConfig, DEFAULT_CACHE_CAPACITY};
use crate::error::{DocbagError, Result};
use crate::graph::ComputeOptions;
use crate::partition::{CountStrategy, PartitionStrategy, PlanOptions};
use crate::store::Filter;

/// Partition size used when neither the caller nor the config file picks one.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Parameters of a partitioned read.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadOptions {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Target documents per partition.
    pub chunk_size: usize,
    /// Connection settings; empty means driver defaults.
    pub connection: ConnectionConfig,
    /// Match filter; empty matches everything.
    pub filter: Filter,
    /// Population sizing used by the planner.
    pub count: CountStrategy,
    /// Boundary derivation used by the planner.
    pub strategy: PartitionStrategy,
    /// Progress bar while paginating.
    pub show_progress: bool,
}

impl ReadOptions {
    /// Reads every document of `database.collection` in `chunk_size` partitions.
    pub fn new(database: impl Into<String>, collection: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            chunk_size,
            connection: ConnectionConfig::new(),
            filter: Filter::new(),
            count: CountStrategy::Exact,
            strategy: PartitionStrategy::BucketAuto,
            show_progress: false,
        }
    }

    /// Sets the connection settings.
    pub fn connection(mut self, connection: impl Into<ConnectionConfig>) -> Self {
        self.connection = connection.into();
        self
    }

    /// Restricts the read to documents matching `filter`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Sizes the plan from the collection-wide estimate instead of an exact
    /// count. The estimate ignores the filter.
    pub fn estimated_count(mut self, enabled: bool) -> Self {
        self.count = if enabled {
            CountStrategy::Estimated
        } else {
            CountStrategy::Exact
        };
        self
    }

    /// Cuts partitions by scanning ids instead of auto-bucketing.
    pub fn paginate(mut self, enabled: bool) -> Self {
        self.strategy = if enabled {
            PartitionStrategy::Paginate
        } else {
            PartitionStrategy::BucketAuto
        };
        self
    }

    /// Shows a progress bar while paginating.
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Planner knobs derived from these options.
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            count: self.count,
            strategy: self.strategy,
            show_progress: self.show_progress,
        }
    }
}

/// Parameters of a partitioned write.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOptions {
    /// Destination database.
    pub database: String,
    /// Destination collection.
    pub collection: String,
    /// Connection settings; empty means driver defaults.
    pub connection: ConnectionConfig,
    /// Run the writes immediately instead of returning a deferred handle.
    pub compute: bool,
    /// Executor knobs used when `compute` is set.
    pub compute_options: ComputeOptions,
}

impl WriteOptions {
    /// Writes into `database.collection`, computing immediately.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            connection: ConnectionConfig::new(),
            compute: true,
            compute_options: ComputeOptions::default(),
        }
    }

    /// Sets the connection settings.
    pub fn connection(mut self, connection: impl Into<ConnectionConfig>) -> Self {
        self.connection = connection.into();
        self
    }

    /// Chooses between immediate execution and a deferred handle.
    pub fn compute(mut self, compute: bool) -> Self {
        self.compute = compute;
        self
    }

    /// Sets executor knobs for immediate execution.
    pub fn compute_options(mut self, options: ComputeOptions) -> Self {
        self.compute_options = options;
        self
    }
}

/// `[defaults]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    /// Documents per partition.
    pub chunk_size: usize,
    /// Connection cache capacity.
    pub cache_capacity: usize,
    /// Executor worker count; unset means available parallelism.
    pub workers: Option<usize>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            workers: None,
        }
    }
}

impl Defaults {
    /// Executor options implied by `workers`.
    pub fn compute_options(&self) -> ComputeOptions {
        self.workers
            .map(ComputeOptions::with_workers)
            .unwrap_or_default()
    }
}

/// Settings file, by default `<config dir>/docbag/config.toml`:
///
/// ```toml
/// default_connection = "local"
///
/// [defaults]
/// chunk_size = 5000
/// workers = 4
///
/// [connections.local]
/// host = "memory"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Numeric defaults.
    #[serde(default)]
    pub defaults: Defaults,
    /// Named connection configs.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Connection used when the caller names none.
    #[serde(default)]
    pub default_connection: Option<String>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl BridgeConfig {
    /// Loads `explicit`, or the default path when it exists. A missing
    /// default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (Some(path), true),
            None => (default_config_path(), false),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path).map_err(|err| DocbagError::Config {
            path: path.clone(),
            message: err.to_string(),
        })?;
        let mut config = Self::parse(&contents, &path)?;
        config.path = Some(path);
        Ok(config)
    }

    /// Parses TOML text; `path` is only used in error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|err| DocbagError::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// File the config was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Resolves a named connection, falling back to `default_connection`
    /// and then to an empty config.
    pub fn connection(&self, name: Option<&str>) -> Result<ConnectionConfig> {
        match name.or(self.default_connection.as_deref()) {
            Some(name) => self.connections.get(name).cloned().ok_or_else(|| {
                DocbagError::invalid(format!("connection `{name}` is not configured"))
            }),
            None => Ok(ConnectionConfig::new()),
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let fail = |message: String| DocbagError::Config {
            path: path.to_path_buf(),
            message,
        };
        if self.defaults.chunk_size == 0 {
            return Err(fail("defaults.chunk_size must be positive".into()));
        }
        if self.defaults.cache_capacity == 0 {
            return Err(fail("defaults.cache_capacity must be positive".into()));
        }
        if let Some(name) = &self.default_connection {
            if !self.connections.contains_key(name) {
                return Err(fail(format!("default_connection `{name}` is not configured")));
            }
        }
        Ok(())
    }
}

/// `<config dir>/docbag/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docbag").join("config.toml"))
}
