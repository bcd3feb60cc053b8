//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunables for a [`SceneCache`](crate::SceneCache) and its coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Worker pool size; 0 = one per hardware thread.
    pub worker_threads: usize,
    /// Target chunk count per worker for `process_in_parallel`.
    pub chunks_per_worker: usize,
    /// Independently locked sub-tables per inverted index.
    pub index_shards: usize,
    /// Separator between a property namespace and the rest of its name.
    pub namespace_separator: char,
    /// Remember that a property does not exist, so repeated misses skip
    /// the store.
    pub cache_missing_handles: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            chunks_per_worker: 4,
            index_shards: 16,
            namespace_separator: ':',
            cache_missing_handles: true,
        }
    }
}

impl CacheConfig {
    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn with_chunks_per_worker(mut self, n: usize) -> Self {
        self.chunks_per_worker = n;
        self
    }

    pub fn with_index_shards(mut self, n: usize) -> Self {
        self.index_shards = n;
        self
    }

    pub fn with_namespace_separator(mut self, separator: char) -> Self {
        self.namespace_separator = separator;
        self
    }

    pub fn with_cache_missing_handles(mut self, enabled: bool) -> Self {
        self.cache_missing_handles = enabled;
        self
    }

    /// Worker count with 0 resolved to the number of CPUs.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads == 0 { num_cpus::get().max(1) } else { self.worker_threads }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunks_per_worker == 0 {
            return Err(Error::Config("chunks_per_worker must be at least 1".into()));
        }
        if self.index_shards == 0 {
            return Err(Error::Config("index_shards must be at least 1".into()));
        }
        if self.namespace_separator == '/' {
            return Err(Error::Config("namespace_separator cannot be the path separator".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
