//! # scenecache: Property Caching and Indexing for Typed Scene Graphs
//!
//! Sits between a hierarchical, typed scene graph and a real-time consumer
//! that asks the same questions thousands of times per frame: "does node N
//! carry trait T?", "what is property P on N?", "which nodes live in
//! namespace X?".
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `BackingStore` / `RawHandle` are the contract with the scene store
//! 2. **Tokens, not strings**: every hot-path name comparison is a pointer compare
//! 3. **Explicit services**: interner, registry and caches are constructed and
//!    injected, never ambient globals
//! 4. **Point queries never fail loudly**: misses are `None`/`false`; only
//!    construction and parallel runs return errors
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use scenecache::{
//!     CacheConfig, NodePath, SceneCache, SchemaType, TokenInterner, TypeRegistry,
//! };
//!
//! # fn main() -> scenecache::Result<()> {
//! let registry = Arc::new(TypeRegistry::new(Arc::new(TokenInterner::new())));
//! registry.register(SchemaType::single_apply("HealthAPI"))?;
//!
//! let scene = SceneCache::open_memory(registry, CacheConfig::default())?;
//! let carrot = NodePath::new("/World/Carrot")?;
//! scene.store().define_node(&carrot, Some("Enemy"));
//! scene.store().define_property(&carrot, "game:health:current", 100.0)?;
//! scene.apply_trait(&carrot, "HealthAPI");
//!
//! let hp = scene.intern("game:health:current");
//! scene.set(&carrot, &hp, 75.0);
//! assert!(scene.is_dirty(&carrot, &hp));
//! assert!(scene.sync_all().is_ok());
//! assert!(scene.find_by_type("HealthAPI").contains(&carrot));
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! | Component | Module |
//! |-----------|--------|
//! | Token Interner | `intern` |
//! | Schema Type Resolver & Cache | `schema` |
//! | Property Index | `index` |
//! | Node Property Cache, Value Cache | `cache` |
//! | Parallel Access Coordinator | `parallel` |
//! | Backing store contract + in-memory store | `storage` |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod intern;
pub mod schema;
pub mod index;
pub mod cache;
pub mod parallel;
pub mod storage;
pub mod config;
pub mod stats;
pub mod export;

use std::sync::Arc;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{NodePath, PropertyValue, Relationship, Token, Value, ValueKind};
pub use intern::{TokenGroup, TokenInterner};
pub use schema::{SchemaKind, SchemaType, SchemaTypeCache, TypeHandle, TypeRegistry};
pub use index::{Criterion, IndexSnapshot, NodeSet, PropertyIndex, RebuildReport, RelationshipSources};
pub use cache::{CachedValue, NodePropertyCache, SyncReport};
pub use parallel::{
    ParallelCoordinator, ParallelReport, Pipeline, PoolState, TaskHandle, WorkerContext, WorkerPool,
};
pub use storage::{BackingStore, MemoryHandle, MemoryStore, RawHandle, StoreCapabilities};
pub use config::CacheConfig;
pub use stats::{CacheStats, StatsSnapshot};

// ============================================================================
// SceneCache
// ============================================================================

/// The primary entry point: every cache and index in front of one store.
///
/// Cloning is cheap and shares all state, which is how the cache is handed
/// to worker threads.
pub struct SceneCache<S: BackingStore> {
    inner: Arc<SceneInner<S>>,
}

struct SceneInner<S: BackingStore> {
    store: S,
    config: CacheConfig,
    interner: Arc<TokenInterner>,
    registry: Arc<TypeRegistry>,
    types: SchemaTypeCache,
    index: PropertyIndex,
    properties: NodePropertyCache<S::Handle>,
    stats: Arc<CacheStats>,
}

impl<S: BackingStore> Clone for SceneCache<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: BackingStore> SceneCache<S> {
    /// Build caches over `store`. Indices start empty; call
    /// [`rebuild_indices`](Self::rebuild_indices) to populate them.
    pub fn new(store: S, registry: Arc<TypeRegistry>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let interner = Arc::clone(registry.interner());
        let stats = Arc::new(CacheStats::new());
        let types = SchemaTypeCache::with_stats(Arc::clone(&registry), Arc::clone(&stats));
        let index = PropertyIndex::new(
            Arc::clone(&registry),
            config.index_shards,
            config.namespace_separator,
        );
        let properties = NodePropertyCache::with_stats(
            Arc::clone(&interner),
            config.namespace_separator,
            config.cache_missing_handles,
            Arc::clone(&stats),
        );
        Ok(Self {
            inner: Arc::new(SceneInner {
                store,
                config,
                interner,
                registry,
                types,
                index,
                properties,
                stats,
            }),
        })
    }

    /// Build over `store` with an empty type registry on `interner`.
    pub fn with_interner(store: S, interner: Arc<TokenInterner>, config: CacheConfig) -> Result<Self> {
        Self::new(store, Arc::new(TypeRegistry::new(interner)), config)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn interner(&self) -> &Arc<TokenInterner> {
        &self.inner.interner
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn types(&self) -> &SchemaTypeCache {
        &self.inner.types
    }

    pub fn index(&self) -> &PropertyIndex {
        &self.inner.index
    }

    pub fn properties(&self) -> &NodePropertyCache<S::Handle> {
        &self.inner.properties
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn intern(&self, name: &str) -> Token {
        self.inner.interner.intern(name)
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Does the node's declared type equal or inherit from `type_name`?
    /// Unknown type names are false.
    pub fn is_a(&self, node: &NodePath, type_name: &str) -> bool {
        self.inner.types.resolve(type_name)
            .is_some_and(|ty| self.inner.types.is_a(&self.inner.store, node, &ty))
    }

    pub fn has_trait(&self, node: &NodePath, trait_name: &str) -> bool {
        self.inner.types.resolve(trait_name)
            .is_some_and(|ty| self.inner.types.has_trait(&self.inner.store, node, &ty))
    }

    pub fn applied_traits(&self, node: &NodePath) -> Vec<TypeHandle> {
        self.inner.types.applied_traits(&self.inner.store, node)
    }

    pub fn trait_instances(&self, node: &NodePath, trait_name: &str) -> Vec<Token> {
        match self.inner.types.resolve(trait_name) {
            Some(ty) => self.inner.types.trait_instances(&self.inner.store, node, &ty),
            None => Vec::new(),
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    pub fn find_by_type(&self, type_name: &str) -> NodeSet {
        self.inner.index.find_by_type(type_name)
    }

    pub fn find_by_property(&self, name: &Token) -> NodeSet {
        self.inner.index.find_by_property(name)
    }

    pub fn find_by_property_prefix(&self, prefix: &str) -> NodeSet {
        self.inner.index.find_by_property_prefix(prefix)
    }

    pub fn find_relationship_sources(&self, target: &NodePath, name: Option<&str>) -> RelationshipSources {
        self.inner.index.find_relationship_sources(target, name)
    }

    pub fn intersect(&self, criteria: &[Criterion]) -> NodeSet {
        self.inner.index.intersect(criteria)
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub fn get_handle(&self, node: &NodePath, name: &Token) -> Option<S::Handle> {
        self.inner.properties.get_handle(&self.inner.store, node, name)
    }

    pub fn pre_cache(&self, node: &NodePath, names: &[Token]) -> usize {
        self.inner.properties.pre_cache(&self.inner.store, node, names)
    }

    pub fn pre_cache_group(&self, node: &NodePath, group: &TokenGroup) -> usize {
        self.inner.properties.pre_cache_group(&self.inner.store, node, group)
    }

    pub fn warm_namespace(&self, node: &NodePath, namespace: &str) -> usize {
        self.inner.properties.warm_namespace(&self.inner.store, node, namespace)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Cached value decoded as `T`. `None` if the property is absent, has no
    /// value, or holds a different kind.
    pub fn get<T: PropertyValue>(&self, node: &NodePath, name: &Token) -> Option<T> {
        let value = self.inner.properties.get_value(&self.inner.store, node, name)?;
        let typed = T::from_value(&value);
        if typed.is_none() {
            tracing::warn!(
                %node,
                property = %name,
                got = value.type_name(),
                expected = T::KIND.map_or("ANY", |k| k.name()),
                "type mismatch reading cached value"
            );
        }
        typed
    }

    pub fn get_or<T: PropertyValue>(&self, node: &NodePath, name: &Token, default: T) -> T {
        self.get(node, name).unwrap_or(default)
    }

    /// Cache a new value. Returns true if it differed and is now dirty.
    pub fn set<T: PropertyValue>(&self, node: &NodePath, name: &Token, value: T) -> bool {
        self.inner.properties.set_value(&self.inner.store, node, name, value.into_value())
    }

    pub fn is_dirty(&self, node: &NodePath, name: &Token) -> bool {
        self.inner.properties.is_dirty(node, name)
    }

    /// Re-read one value from the store, discarding local changes.
    pub fn load(&self, node: &NodePath, name: &Token) -> bool {
        self.inner.properties.load(&self.inner.store, node, name)
    }

    pub fn sync(&self, node: &NodePath, name: &Token) -> bool {
        self.inner.properties.sync(node, name)
    }

    /// [`sync`](Self::sync) with the failure as an error, for `?` inside
    /// parallel callbacks.
    pub fn try_sync(&self, node: &NodePath, name: &Token) -> Result<()> {
        if self.sync(node, name) {
            Ok(())
        } else {
            Err(Error::SyncFailed { node: node.to_string(), property: name.to_string() })
        }
    }

    pub fn sync_node(&self, node: &NodePath) -> SyncReport {
        self.inner.properties.sync_node(node)
    }

    pub fn sync_all(&self) -> SyncReport {
        self.inner.properties.sync_all()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.properties.dirty_count()
    }

    // ========================================================================
    // Invalidation and indexing
    // ========================================================================

    /// Drop every per-node cache entry (type checks, handles, values).
    /// Returns true if anything was cached.
    pub fn invalidate(&self, node: &NodePath) -> bool {
        let types = self.inner.types.invalidate(node);
        let properties = self.inner.properties.invalidate(node);
        types || properties
    }

    pub fn invalidate_property(&self, node: &NodePath, name: &Token) -> bool {
        self.inner.properties.invalidate_property(node, name)
    }

    /// Invalidate the node's caches and re-index it from the store.
    pub fn refresh_node(&self, node: &NodePath) -> bool {
        self.invalidate(node);
        self.add_node(node)
    }

    /// Index `node`. A node the store no longer contains is unindexed and
    /// evicted instead; returns false in that case.
    pub fn add_node(&self, node: &NodePath) -> bool {
        let indexed = self.inner.index.add_node(&self.inner.store, node);
        if !indexed {
            self.invalidate(node);
        }
        indexed
    }

    /// Unindex a node and evict its cache entries.
    pub fn remove_node(&self, node: &NodePath) -> bool {
        let removed = self.inner.index.remove_node(node);
        self.invalidate(node);
        removed
    }

    /// Re-index the whole store and drop every cached type check. Nodes
    /// that left the store are evicted from the property cache too.
    pub fn rebuild_indices(&self) -> RebuildReport {
        self.inner.types.clear();
        let report = self.inner.index.rebuild(&self.inner.store);
        for node in &report.dropped {
            self.inner.properties.invalidate(node);
        }
        report
    }

    // ========================================================================
    // Schema mutation
    // ========================================================================

    /// Apply a trait through the store, then refresh the node.
    pub fn apply_trait(&self, node: &NodePath, trait_name: &str) -> bool {
        let applied = self.inner.store.apply_trait(node, trait_name);
        if applied {
            self.refresh_node(node);
        }
        applied
    }

    pub fn remove_trait(&self, node: &NodePath, trait_name: &str) -> bool {
        let removed = self.inner.store.remove_trait(node, trait_name);
        if removed {
            self.refresh_node(node);
        }
        removed
    }

    pub fn set_type_name(&self, node: &NodePath, type_name: Option<&str>) -> bool {
        let changed = self.inner.store.set_type_name(node, type_name);
        if changed {
            self.refresh_node(node);
        }
        changed
    }
}

/// In-memory scene for testing and embedding.
impl SceneCache<MemoryStore> {
    pub fn open_memory(registry: Arc<TypeRegistry>, config: CacheConfig) -> Result<Self> {
        Self::new(MemoryStore::new(), registry, config)
    }
}

impl<S: BackingStore> std::fmt::Debug for SceneCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneCache")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("index", &self.inner.index)
            .field("properties", &self.inner.properties)
            .finish()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid node path: {0}")]
    InvalidPath(String),

    #[error("Unknown schema type: {0}")]
    UnknownType(String),

    #[error("Schema type already registered: {0}")]
    DuplicateType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Backing store rejected write to {node}.{property}")]
    SyncFailed { node: String, property: String },

    #[error("Worker pool is shut down")]
    PoolShutdown,

    #[error("Failed to spawn worker thread: {0}")]
    PoolSpawn(std::io::Error),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Task timed out")]
    TaskTimedOut,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
