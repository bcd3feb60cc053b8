//! Per-node schema membership cache.
//!
//! `is_a` walks type inheritance from the node's declared type;
//! `has_trait` inspects the node's applied-trait list. Both answers are
//! memoized per `(node, type)` and must be dropped with
//! [`SchemaTypeCache::invalidate`] whenever the node's declared type or trait
//! list changes.
//!
//! Each node's record is fetched before the store is read and results are
//! written into that record. `invalidate` detaches the record from the map,
//! so a lookup that raced an invalidation writes into a detached record and
//! the stale answer is never served. Nodes the store does not contain get no
//! record at all.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::{NodePath, Token};
use crate::stats::CacheStats;
use crate::storage::BackingStore;
use super::{TypeHandle, TypeRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Check {
    IsA,
    HasTrait,
}

#[derive(Debug, Clone)]
struct AppliedTrait {
    handle: TypeHandle,
    instance: Option<Token>,
}

#[derive(Debug, Default)]
struct NodeTypes {
    checks: RwLock<HashMap<(Token, Check), bool>>,
    applied: RwLock<Option<Arc<[AppliedTrait]>>>,
}

/// Memoizes `is_a` / `has_trait` / `applied_traits` per node.
pub struct SchemaTypeCache {
    registry: Arc<TypeRegistry>,
    nodes: RwLock<HashMap<NodePath, Arc<NodeTypes>>>,
    stats: Arc<CacheStats>,
}

impl SchemaTypeCache {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_stats(registry, Arc::new(CacheStats::new()))
    }

    pub fn with_stats(registry: Arc<TypeRegistry>, stats: Arc<CacheStats>) -> Self {
        Self { registry, nodes: RwLock::new(HashMap::new()), stats }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Resolve a type name; `None` if the registry does not know it.
    pub fn resolve(&self, type_name: &str) -> Option<TypeHandle> {
        self.registry.resolve(type_name)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Does the node's declared type equal or inherit from `ty`?
    pub fn is_a<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath, ty: &TypeHandle) -> bool {
        self.cached_check(store, node, ty, Check::IsA, |_| {
            let Some(declared) = store.node_type_name(node) else {
                return false;
            };
            match self.registry.get(&declared) {
                Some(handle) => handle.is_a(ty),
                None => declared == ty.name().as_str(),
            }
        })
    }

    /// Is `trait_type` (or a descendant of it) applied to the node?
    pub fn has_trait<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath, trait_type: &TypeHandle) -> bool {
        self.cached_check(store, node, trait_type, Check::HasTrait, |record| {
            self.applied_in(record, store, node).iter().any(|t| t.handle.is_a(trait_type))
        })
    }

    /// Dispatch on the kind of `ty`: traits go through `has_trait`, declared
    /// types through `is_a`.
    pub fn matches<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath, ty: &TypeHandle) -> bool {
        if ty.is_trait() {
            self.has_trait(store, node, ty)
        } else {
            self.is_a(store, node, ty)
        }
    }

    /// By-name variant of [`matches`](Self::matches); unknown names are false.
    pub fn matches_name<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath, type_name: &str) -> bool {
        self.resolve(type_name).is_some_and(|ty| self.matches(store, node, &ty))
    }

    /// Trait types applied to the node, in application order, deduplicated.
    /// Trait names the registry does not know are skipped.
    pub fn applied_traits<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath) -> Vec<TypeHandle> {
        let applied = self.applied(store, node);
        let mut out: Vec<TypeHandle> = Vec::with_capacity(applied.len());
        for t in applied.iter() {
            if !out.contains(&t.handle) {
                out.push(t.handle.clone());
            }
        }
        out
    }

    /// Instance names under which a multiple-apply trait is applied.
    pub fn trait_instances<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        node: &NodePath,
        trait_type: &TypeHandle,
    ) -> Vec<Token> {
        self.applied(store, node)
            .iter()
            .filter(|t| &t.handle == trait_type)
            .filter_map(|t| t.instance.clone())
            .collect()
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Forget everything cached for `node`. Returns true if anything was cached.
    pub fn invalidate(&self, node: &NodePath) -> bool {
        self.nodes.write().remove(node).is_some()
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }

    pub fn cached_node_count(&self) -> usize {
        self.nodes.read().len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// The node's record, created on first use. `None` for nodes the store
    /// does not contain, so unknown paths never grow the cache.
    fn record<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath) -> Option<Arc<NodeTypes>> {
        if let Some(record) = self.nodes.read().get(node) {
            return Some(Arc::clone(record));
        }
        if !store.contains_node(node) {
            return None;
        }
        Some(Arc::clone(self.nodes.write().entry(node.clone()).or_default()))
    }

    fn cached_check<S: BackingStore + ?Sized>(
        &self,
        store: &S,
        node: &NodePath,
        ty: &TypeHandle,
        check: Check,
        compute: impl FnOnce(Option<&NodeTypes>) -> bool,
    ) -> bool {
        let key = (ty.name().clone(), check);
        let record = self.record(store, node);
        if let Some(hit) = record.as_ref().and_then(|r| r.checks.read().get(&key).copied()) {
            self.stats.types.hit();
            return hit;
        }
        self.stats.types.miss();
        let result = compute(record.as_deref());
        tracing::trace!(%node, type_name = %ty, ?check, result, "schema check miss");
        if let Some(record) = record {
            record.checks.write().insert(key, result);
        }
        result
    }

    fn applied<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath) -> Arc<[AppliedTrait]> {
        let record = self.record(store, node);
        self.applied_in(record.as_deref(), store, node)
    }

    fn applied_in<S: BackingStore + ?Sized>(
        &self,
        record: Option<&NodeTypes>,
        store: &S,
        node: &NodePath,
    ) -> Arc<[AppliedTrait]> {
        if let Some(applied) = record.and_then(|r| r.applied.read().clone()) {
            return applied;
        }
        let applied: Arc<[AppliedTrait]> = store
            .applied_traits(node)
            .iter()
            .filter_map(|name| {
                let resolved = self.registry.resolve_applied(name);
                if resolved.is_none() {
                    tracing::trace!(%node, trait_name = %name, "applied trait not in registry");
                }
                resolved
            })
            .filter(|(handle, _)| handle.is_trait())
            .map(|(handle, instance)| AppliedTrait { handle, instance })
            .collect();
        if let Some(record) = record {
            *record.applied.write() = Some(Arc::clone(&applied));
        }
        applied
    }
}

impl std::fmt::Debug for SchemaTypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaTypeCache")
            .field("registry", &self.registry)
            .field("cached_nodes", &self.cached_node_count())
            .finish()
    }
}
