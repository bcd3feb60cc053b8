//! Chunked parallel map over nodes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::intern::TokenInterner;
use crate::model::{NodePath, Token};
use crate::storage::BackingStore;
use crate::{Result, SceneCache};
use super::pool::{PoolState, WorkerPool};

/// What one parallel run covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelReport {
    pub nodes: usize,
    pub chunks: usize,
}

/// Per-chunk context handed to `process_in_parallel_with` callbacks.
pub struct WorkerContext {
    chunk: usize,
    interner: Arc<TokenInterner>,
}

impl WorkerContext {
    /// Index of the chunk being processed.
    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Intern through the worker thread's private token cache.
    pub fn intern(&self, name: &str) -> Token {
        self.interner.intern_cached(name)
    }

    pub fn interner(&self) -> &Arc<TokenInterner> {
        &self.interner
    }
}

/// Distributes node batches over a [`WorkerPool`].
///
/// Each node is handed to exactly one task, so as long as a callback only
/// writes properties of the node it was given, every property has a single
/// writer per run.
pub struct ParallelCoordinator {
    pool: WorkerPool,
    chunks_per_worker: usize,
    interner: Arc<TokenInterner>,
}

impl ParallelCoordinator {
    pub fn new(config: &CacheConfig, interner: Arc<TokenInterner>) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.effective_workers(), "scenecache-worker")?;
        Ok(Self { pool, chunks_per_worker: config.chunks_per_worker, interner })
    }

    /// Coordinator sharing the cache's config and interner.
    pub fn for_cache<S: BackingStore>(cache: &SceneCache<S>) -> Result<Self> {
        Self::new(cache.config(), Arc::clone(cache.interner()))
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Chunk size giving roughly `workers * chunks_per_worker` chunks.
    pub fn chunk_size(&self, nodes: usize) -> usize {
        let target = self.pool.size() * self.chunks_per_worker;
        nodes.div_ceil(target).max(1)
    }

    /// Run `f` on every node, blocking until all chunks finish.
    ///
    /// A chunk stops at its first failing node. Other chunks always run to
    /// completion; the error of the lowest-numbered failing chunk is
    /// returned once everything has finished.
    pub fn process_in_parallel<F>(&self, nodes: Vec<NodePath>, f: F) -> Result<ParallelReport>
    where
        F: Fn(&NodePath) -> Result<()> + Send + Sync + 'static,
    {
        self.process_in_parallel_with(nodes, move |_, node| f(node))
    }

    /// Like [`process_in_parallel`](Self::process_in_parallel) with access to
    /// a [`WorkerContext`].
    pub fn process_in_parallel_with<F>(&self, nodes: Vec<NodePath>, f: F) -> Result<ParallelReport>
    where
        F: Fn(&WorkerContext, &NodePath) -> Result<()> + Send + Sync + 'static,
    {
        let total = nodes.len();
        if total == 0 {
            return Ok(ParallelReport::default());
        }
        let f = Arc::new(f);
        let size = self.chunk_size(total);

        let mut handles = Vec::new();
        let mut first_error = None;
        for (i, chunk) in nodes.chunks(size).enumerate() {
            let chunk = chunk.to_vec();
            let f = Arc::clone(&f);
            let ctx = WorkerContext { chunk: i, interner: Arc::clone(&self.interner) };
            let submitted = self.pool.execute(move || {
                for node in &chunk {
                    f(&ctx, node)?;
                }
                Ok(())
            });
            match submitted {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                    break;
                }
            }
        }

        let chunks = handles.len();
        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.wait() {
                tracing::warn!(chunk = i, error = %e, "parallel chunk failed");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(nodes = total, chunks, "parallel run finished");

        match first_error {
            Some(e) => Err(e),
            None => Ok(ParallelReport { nodes: total, chunks }),
        }
    }

    /// Run `f` on every node carrying `trait_name` according to the cache's
    /// property index.
    pub fn update_component_type<S, F>(
        &self,
        cache: &SceneCache<S>,
        trait_name: &str,
        f: F,
    ) -> Result<ParallelReport>
    where
        S: BackingStore,
        F: Fn(&SceneCache<S>, &NodePath) -> Result<()> + Send + Sync + 'static,
    {
        let mut nodes: Vec<NodePath> = cache.find_by_type(trait_name).into_iter().collect();
        nodes.sort();
        let cache = cache.clone();
        self.process_in_parallel(nodes, move |node| f(&cache, node))
    }
}

impl std::fmt::Debug for ParallelCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelCoordinator")
            .field("pool", &self.pool)
            .field("chunks_per_worker", &self.chunks_per_worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(workers: usize) -> ParallelCoordinator {
        let config = CacheConfig::default().with_worker_threads(workers);
        ParallelCoordinator::new(&config, Arc::new(TokenInterner::new())).unwrap()
    }

    fn nodes(n: usize) -> Vec<NodePath> {
        (0..n).map(|i| NodePath::new(format!("/N{i}")).unwrap()).collect()
    }

    #[test]
    fn test_chunk_size() {
        let c = coordinator(2);
        assert_eq!(c.chunk_size(1), 1);
        assert_eq!(c.chunk_size(8), 1);
        assert_eq!(c.chunk_size(100), 13);
    }

    #[test]
    fn test_every_node_visited_once() {
        let c = coordinator(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let report = c.process_in_parallel(nodes(1000), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1000);
        assert_eq!(report.nodes, 1000);
        assert_eq!(report.chunks, 16);
    }

    #[test]
    fn test_error_surfaces_after_all_chunks() {
        let c = coordinator(2);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let result = c.process_in_parallel(nodes(80), move |node| {
            counter.fetch_add(1, Ordering::SeqCst);
            if node.as_str() == "/N0" {
                return Err(Error::NotFound(node.to_string()));
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::NotFound(ref n)) if n == "/N0"));
        // Chunk 0 (/N0..=/N9) stopped after its first node; the rest ran.
        assert_eq!(seen.load(Ordering::SeqCst), 71);
    }

    #[test]
    fn test_worker_context_interns_through_thread_cache() {
        let c = coordinator(2);
        let interner = Arc::clone(&c.interner);
        c.process_in_parallel_with(nodes(16), |ctx, _| {
            let a = ctx.intern("game:health:current");
            assert!(a.ptr_eq(&ctx.intern("game:health:current")));
            assert!(ctx.interner().thread_cache_len() >= 1);
            Ok(())
        }).unwrap();
        assert!(interner.contains("game:health:current"));
    }

    #[test]
    fn test_after_shutdown() {
        let c = coordinator(1);
        c.shutdown();
        assert!(matches!(c.process_in_parallel(nodes(3), |_| Ok(())), Err(Error::PoolShutdown)));
        assert!(c.process_in_parallel(Vec::new(), |_| Ok(())).is_ok());
    }
}
