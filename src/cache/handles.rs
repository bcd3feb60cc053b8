//! Per-node cache of property handles and decoded values.
//!
//! Handles are grouped by namespace (the part of the property name before
//! the first separator) so that every `game:health:*` handle of a node can
//! be warmed in one call. Negative lookups are remembered too when
//! configured, so a property that does not exist costs one store lookup,
//! not one per frame.
//!
//! Lookups fetch the node's entry before reading the store and write their
//! result into that entry. Evicting a node detaches its entry, and
//! `invalidate_property` bumps the entry's generation, so a lookup that
//! raced an eviction never caches what it read. Nodes the store does not
//! contain never get an entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::intern::{TokenGroup, TokenInterner};
use crate::model::{NodePath, Token, Value};
use crate::stats::CacheStats;
use crate::storage::{BackingStore, RawHandle};
use super::CachedValue;

/// Type-erased value slot owned by a node entry.
pub type ValueSlot<H> = Arc<CachedValue<Value, H>>;

/// Outcome of a bulk sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Dirty values written back.
    pub synced: usize,
    /// Dirty values the store rejected; they stay dirty.
    pub failed: usize,
}

impl SyncReport {
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }

    fn merge(&mut self, other: SyncReport) {
        self.synced += other.synced;
        self.failed += other.failed;
    }
}

struct NodeEntry<H: RawHandle> {
    /// namespace → property → handle (`None` = known missing)
    handles: RwLock<HashMap<Box<str>, HashMap<Token, Option<H>>>>,
    values: RwLock<HashMap<Token, ValueSlot<H>>>,
    /// Bumped by `invalidate_property` while both maps are write-locked.
    generation: AtomicU64,
}

impl<H: RawHandle> Default for NodeEntry<H> {
    fn default() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<H: RawHandle> NodeEntry<H> {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn dirty_slots(&self) -> Vec<ValueSlot<H>> {
        self.values.read().values().filter(|v| v.is_dirty()).cloned().collect()
    }

    fn dirty_count(&self) -> usize {
        self.values.read().values().filter(|v| v.is_dirty()).count()
    }
}

/// Handle and value cache for every node touched so far.
pub struct NodePropertyCache<H: RawHandle> {
    interner: Arc<TokenInterner>,
    separator: char,
    cache_missing: bool,
    stats: Arc<CacheStats>,
    nodes: RwLock<HashMap<NodePath, Arc<NodeEntry<H>>>>,
}

impl<H: RawHandle> NodePropertyCache<H> {
    pub fn new(interner: Arc<TokenInterner>, separator: char, cache_missing: bool) -> Self {
        Self::with_stats(interner, separator, cache_missing, Arc::new(CacheStats::new()))
    }

    pub fn with_stats(
        interner: Arc<TokenInterner>,
        separator: char,
        cache_missing: bool,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self { interner, separator, cache_missing, stats, nodes: RwLock::new(HashMap::new()) }
    }

    /// The node's entry, created on first use. `None` if the store does not
    /// contain the node.
    fn entry<S>(&self, store: &S, node: &NodePath) -> Option<Arc<NodeEntry<H>>>
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        if let Some(entry) = self.nodes.read().get(node) {
            return Some(Arc::clone(entry));
        }
        if !store.contains_node(node) {
            return None;
        }
        Some(Arc::clone(self.nodes.write().entry(node.clone()).or_default()))
    }

    fn existing(&self, node: &NodePath) -> Option<Arc<NodeEntry<H>>> {
        self.nodes.read().get(node).cloned()
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Resolve the store handle for `(node, name)`, memoizing the result.
    pub fn get_handle<S>(&self, store: &S, node: &NodePath, name: &Token) -> Option<H>
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        let Some(entry) = self.entry(store, node) else {
            self.stats.handles.miss();
            return None;
        };
        self.handle_in(&entry, store, node, name)
    }

    fn handle_in<S>(&self, entry: &NodeEntry<H>, store: &S, node: &NodePath, name: &Token) -> Option<H>
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        let namespace = name.namespace(self.separator);
        if let Some(cached) = entry.handles.read().get(namespace).and_then(|ns| ns.get(name)) {
            self.stats.handles.hit();
            return cached.clone();
        }
        self.stats.handles.miss();
        let generation = entry.generation();
        let handle = store.get_property(node, name);
        if handle.is_none() {
            tracing::trace!(%node, property = %name, "property handle not found");
        }
        if handle.is_some() || self.cache_missing {
            let mut handles = entry.handles.write();
            if entry.generation() == generation {
                handles.entry(Box::from(namespace)).or_default().insert(name.clone(), handle.clone());
            }
        }
        handle
    }

    /// Resolve several handles under one exclusive section.
    /// Returns how many of `names` resolved to a handle.
    pub fn pre_cache<'a, S, I>(&self, store: &S, node: &NodePath, names: I) -> usize
    where
        S: BackingStore<Handle = H> + ?Sized,
        I: IntoIterator<Item = &'a Token>,
    {
        let Some(entry) = self.entry(store, node) else {
            return 0;
        };
        let mut handles = entry.handles.write();
        let mut found = 0;
        for name in names {
            let ns = handles.entry(Box::from(name.namespace(self.separator))).or_default();
            let handle = match ns.get(name) {
                Some(cached) => cached.clone(),
                None => {
                    let handle = store.get_property(node, name);
                    if handle.is_some() || self.cache_missing {
                        ns.insert(name.clone(), handle.clone());
                    }
                    handle
                }
            };
            if handle.is_some() {
                found += 1;
            }
        }
        handles.retain(|_, ns| !ns.is_empty());
        found
    }

    pub fn pre_cache_group<S>(&self, store: &S, node: &NodePath, group: &TokenGroup) -> usize
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        self.pre_cache(store, node, group.tokens())
    }

    /// Resolve every property the node has in `namespace`.
    pub fn warm_namespace<S>(&self, store: &S, node: &NodePath, namespace: &str) -> usize
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        let names: Vec<Token> = store
            .property_names(node)
            .iter()
            .filter(|name| name.split_once(self.separator).is_some_and(|(ns, _)| ns == namespace))
            .map(|name| self.interner.intern(name))
            .collect();
        self.pre_cache(store, node, &names)
    }

    /// Cached, resolved handles of one namespace, ordered by name.
    pub fn namespace_handles(&self, node: &NodePath, namespace: &str) -> Vec<(Token, H)> {
        let Some(entry) = self.existing(node) else {
            return Vec::new();
        };
        let mut out: Vec<(Token, H)> = entry.handles.read()
            .get(namespace)
            .map(|ns| {
                ns.iter()
                    .filter_map(|(t, h)| h.as_ref().map(|h| (t.clone(), h.clone())))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Number of cached handle lookups (including negative ones) for `node`.
    pub fn handle_count(&self, node: &NodePath) -> usize {
        self.existing(node)
            .map(|e| e.handles.read().values().map(|ns| ns.len()).sum::<usize>())
            .unwrap_or(0)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// The value slot for `(node, name)`, if one has been created.
    pub fn slot(&self, node: &NodePath, name: &Token) -> Option<ValueSlot<H>> {
        self.existing(node)?.values.read().get(name).cloned()
    }

    /// Cached value, loading it from the store on first access.
    /// `None` if the property does not exist or has no value.
    pub fn get_value<S>(&self, store: &S, node: &NodePath, name: &Token) -> Option<Value>
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        if let Some(slot) = self.slot(node, name) {
            self.stats.values.hit();
            return Some(slot.get());
        }
        self.stats.values.miss();
        let entry = self.entry(store, node)?;
        let generation = entry.generation();
        let handle = self.handle_in(&entry, store, node, name)?;
        let Some(current) = handle.decode() else {
            self.stats.record_load(false);
            return None;
        };
        self.stats.record_load(true);
        let (slot, _) = self.install(&entry, generation, name, || CachedValue::decoded(Some(handle), current));
        Some(slot.get())
    }

    /// Set a value, comparing with the cached (or stored) one first.
    /// Returns true if the value changed and is now dirty.
    pub fn set_value<S>(&self, store: &S, node: &NodePath, name: &Token, value: Value) -> bool
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        if let Some(slot) = self.slot(node, name) {
            return slot.set(value);
        }
        let Some(entry) = self.entry(store, node) else {
            tracing::trace!(%node, property = %name, "set on a node the store does not contain");
            return false;
        };
        let generation = entry.generation();
        let handle = self.handle_in(&entry, store, node, name);
        let current = handle.as_ref().and_then(|h| h.decode());
        if current.as_ref() == Some(&value) {
            self.stats.record_load(true);
            self.stats.record_suppressed_write();
            let _ = self.install(&entry, generation, name, || CachedValue::decoded(handle, value));
            return false;
        }
        let (slot, created) =
            self.install(&entry, generation, name, || CachedValue::pending(handle, value.clone()));
        // Another writer may have installed the slot first.
        created || slot.set(value)
    }

    /// Insert a slot unless one already exists. Returns the slot and whether
    /// `make` ran. If the property was invalidated since `generation` was
    /// read, the new slot is handed back without being cached.
    fn install(
        &self,
        entry: &NodeEntry<H>,
        generation: u64,
        name: &Token,
        make: impl FnOnce() -> CachedValue<Value, H>,
    ) -> (ValueSlot<H>, bool) {
        let mut values = entry.values.write();
        if let Some(slot) = values.get(name) {
            return (Arc::clone(slot), false);
        }
        let slot = Arc::new(make().with_stats(Arc::clone(&self.stats)));
        if entry.generation() == generation {
            values.insert(name.clone(), Arc::clone(&slot));
        }
        (slot, true)
    }

    /// Reload one value from the store. On failure the slot is dropped, so
    /// the next read falls back to the caller's default.
    pub fn load<S>(&self, store: &S, node: &NodePath, name: &Token) -> bool
    where
        S: BackingStore<Handle = H> + ?Sized,
    {
        let slot = match self.slot(node, name) {
            Some(slot) => slot,
            None => {
                let Some(entry) = self.entry(store, node) else {
                    self.stats.record_load(false);
                    return false;
                };
                let generation = entry.generation();
                let Some(handle) = self.handle_in(&entry, store, node, name) else {
                    self.stats.record_load(false);
                    return false;
                };
                let Some(current) = handle.decode() else {
                    self.stats.record_load(false);
                    return false;
                };
                self.install(&entry, generation, name, || CachedValue::new(Some(handle), current)).0
            }
        };
        if slot.load() {
            return true;
        }
        self.invalidate_property(node, name);
        false
    }

    pub fn is_dirty(&self, node: &NodePath, name: &Token) -> bool {
        self.slot(node, name).is_some_and(|s| s.is_dirty())
    }

    /// Write one value back. Values never read or written succeed trivially.
    pub fn sync(&self, node: &NodePath, name: &Token) -> bool {
        self.slot(node, name).is_none_or(|s| s.sync())
    }

    /// Write back every dirty value of `node`.
    pub fn sync_node(&self, node: &NodePath) -> SyncReport {
        let mut report = SyncReport::default();
        if let Some(entry) = self.existing(node) {
            for slot in entry.dirty_slots() {
                if slot.sync() {
                    report.synced += 1;
                } else {
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Write back every dirty value in the cache.
    pub fn sync_all(&self) -> SyncReport {
        let nodes: Vec<NodePath> = self.nodes.read().keys().cloned().collect();
        let mut report = SyncReport::default();
        for node in &nodes {
            report.merge(self.sync_node(node));
        }
        tracing::debug!(synced = report.synced, failed = report.failed, "synced dirty values");
        report
    }

    pub fn dirty_count(&self) -> usize {
        let entries: Vec<Arc<NodeEntry<H>>> = self.nodes.read().values().cloned().collect();
        entries.iter().map(|e| e.dirty_count()).sum()
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Drop every handle and value cached for `node`. Dirty values are
    /// discarded. Returns true if the node was cached.
    pub fn invalidate(&self, node: &NodePath) -> bool {
        let Some(entry) = self.nodes.write().remove(node) else {
            return false;
        };
        let dirty = entry.dirty_count();
        if dirty > 0 {
            tracing::warn!(%node, dirty, "discarding unsynced values on eviction");
        }
        true
    }

    /// Drop the handle and value cached for one property.
    pub fn invalidate_property(&self, node: &NodePath, name: &Token) -> bool {
        let Some(entry) = self.existing(node) else {
            return false;
        };
        let mut values = entry.values.write();
        let mut handles = entry.handles.write();
        entry.generation.fetch_add(1, Ordering::AcqRel);

        let value = values.remove(name);
        if value.as_ref().is_some_and(|v| v.is_dirty()) {
            tracing::warn!(%node, property = %name, "discarding unsynced value");
        }
        let namespace = name.namespace(self.separator);
        let handle = handles.get_mut(namespace).and_then(|ns| ns.remove(name));
        if handles.get(namespace).is_some_and(|ns| ns.is_empty()) {
            handles.remove(namespace);
        }
        value.is_some() || handle.is_some()
    }

    pub fn clear(&self) {
        let dirty = self.dirty_count();
        if dirty > 0 {
            tracing::warn!(dirty, "discarding unsynced values on clear");
        }
        self.nodes.write().clear();
    }

    pub fn cached_node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn contains_node(&self, node: &NodePath) -> bool {
        self.nodes.read().contains_key(node)
    }
}

impl<H: RawHandle> std::fmt::Debug for NodePropertyCache<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePropertyCache")
            .field("nodes", &self.cached_node_count())
            .field("separator", &self.separator)
            .field("cache_missing", &self.cache_missing)
            .finish()
    }
}
