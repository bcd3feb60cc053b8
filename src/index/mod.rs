//! # Property Index
//!
//! Four inverted indices over the scene, used for discovery queries
//! ("every node with trait X") rather than point access:
//!
//! | Index | Key | Value |
//! |-------|-----|-------|
//! | type | type or trait name (plus every ancestor) | nodes |
//! | property | property token | nodes |
//! | prefix | property namespace (`game`, `game:health`) | nodes |
//! | relationship | target node | relationship name → source nodes |
//!
//! Every indexed node also keeps an [`entry`](NodeEntry) recording exactly
//! which keys it was inserted under. `remove_node` replays that entry, which
//! makes it the exact inverse of `add_node` even if the store changed in
//! between. Keys whose node set becomes empty are removed.
//!
//! ## Consistency
//!
//! Writers are serialized by the entry table lock. The four indices are
//! updated one after another, so a concurrent reader may observe a node in
//! the type index before it appears in the property index. Callers that need
//! cross-index atomicity must hold their own lock.
//!
//! `rebuild` builds a complete new set of tables off to the side and swaps
//! it in with a single pointer store. It holds the writer lock throughout,
//! so an `add_node`/`remove_node` issued mid-rebuild waits and then applies
//! on top of the new tables instead of being lost in the swap.

mod shard;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::intern::TokenInterner;
use crate::model::{NodePath, Token};
use crate::schema::{TypeHandle, TypeRegistry};
use crate::storage::BackingStore;

use shard::ShardedTable;
pub use shard::{NodeSet, RelationshipSources};

// ============================================================================
// Criteria
// ============================================================================

/// One discovery condition for [`PropertyIndex::intersect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    /// Declared type or applied trait, including descendants.
    Type(String),
    /// Authored property, by full name.
    Property(String),
    /// Property namespace or raw name prefix.
    PropertyPrefix(String),
    /// Sources of a relationship pointing at `target`; any relationship
    /// name when `name` is `None`.
    TargetOf { target: NodePath, name: Option<String> },
}

impl Criterion {
    pub fn of_type(name: impl Into<String>) -> Self {
        Criterion::Type(name.into())
    }

    pub fn property(name: impl Into<String>) -> Self {
        Criterion::Property(name.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Criterion::PropertyPrefix(prefix.into())
    }

    pub fn target_of(target: NodePath, name: Option<&str>) -> Self {
        Criterion::TargetOf { target, name: name.map(str::to_owned) }
    }
}

/// Intersect node sets, smallest first. No sets yields an empty result.
pub fn intersect_sets(mut sets: Vec<NodeSet>) -> NodeSet {
    if sets.is_empty() {
        return NodeSet::new();
    }
    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let mut result = iter.next().unwrap_or_default();
    for set in iter {
        if result.is_empty() {
            break;
        }
        result.retain(|node| set.contains(node));
    }
    result
}

// ============================================================================
// Per-node entry
// ============================================================================

/// Every key one node is indexed under.
#[derive(Debug, Clone, Default, PartialEq)]
struct NodeEntry {
    types: Vec<Token>,
    properties: Vec<Token>,
    prefixes: Vec<String>,
    /// Outgoing relationships: name → targets.
    relationships: Vec<(String, Vec<NodePath>)>,
}

struct Tables {
    by_type: ShardedTable<Token, NodeSet>,
    by_property: ShardedTable<Token, NodeSet>,
    by_prefix: ShardedTable<String, NodeSet>,
    by_target: ShardedTable<NodePath, RelationshipSources>,
}

impl Tables {
    fn new(shards: usize) -> Self {
        Self {
            by_type: ShardedTable::new(shards),
            by_property: ShardedTable::new(shards),
            by_prefix: ShardedTable::new(shards),
            by_target: ShardedTable::new(shards),
        }
    }

    fn insert(&self, node: &NodePath, entry: &NodeEntry) {
        for ty in &entry.types {
            self.by_type.insert(ty, node);
        }
        for prop in &entry.properties {
            self.by_property.insert(prop, node);
        }
        for prefix in &entry.prefixes {
            self.by_prefix.insert(prefix, node);
        }
        for (name, targets) in &entry.relationships {
            for target in targets {
                self.by_target.update(target, |sources| {
                    sources.entry(name.clone()).or_default().insert(node.clone());
                });
            }
        }
    }

    fn remove(&self, node: &NodePath, entry: &NodeEntry) {
        for ty in &entry.types {
            self.by_type.remove(ty, node);
        }
        for prop in &entry.properties {
            self.by_property.remove(prop, node);
        }
        for prefix in &entry.prefixes {
            self.by_prefix.remove(prefix, node);
        }
        for (name, targets) in &entry.relationships {
            for target in targets {
                self.by_target.update_existing(target, |sources| {
                    if let Some(set) = sources.get_mut(name) {
                        set.remove(node);
                        if set.is_empty() {
                            sources.remove(name);
                        }
                    }
                });
            }
        }
    }

    fn clear(&self) {
        self.by_type.clear();
        self.by_property.clear();
        self.by_prefix.clear();
        self.by_target.clear();
    }
}

/// Outcome of [`PropertyIndex::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Nodes indexed after the rebuild.
    pub indexed: usize,
    /// Previously indexed nodes the store no longer contains, sorted.
    pub dropped: Vec<NodePath>,
}

// ============================================================================
// PropertyIndex
// ============================================================================

/// Inverted indices over a backing store.
pub struct PropertyIndex {
    registry: Arc<TypeRegistry>,
    separator: char,
    shards: usize,
    tables: RwLock<Arc<Tables>>,
    entries: Mutex<HashMap<NodePath, NodeEntry>>,
}

impl PropertyIndex {
    pub fn new(registry: Arc<TypeRegistry>, shards: usize, separator: char) -> Self {
        let shards = shards.max(1);
        Self {
            registry,
            separator,
            shards,
            tables: RwLock::new(Arc::new(Tables::new(shards))),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn interner(&self) -> &Arc<TokenInterner> {
        self.registry.interner()
    }

    fn tables(&self) -> Arc<Tables> {
        Arc::clone(&self.tables.read())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Index (or re-index) `node` from the store.
    ///
    /// A node the store does not contain is removed instead. Returns true if
    /// the node is indexed afterwards.
    pub fn add_node<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath) -> bool {
        let mut entries = self.entries.lock();
        if !store.contains_node(node) {
            if let Some(old) = entries.remove(node) {
                self.tables().remove(node, &old);
                tracing::trace!(%node, "unindexed vanished node");
            }
            return false;
        }
        let entry = self.compute_entry(store, node);
        let tables = self.tables();
        if let Some(old) = entries.get(node) {
            if *old == entry {
                return true;
            }
            tables.remove(node, old);
        }
        tables.insert(node, &entry);
        tracing::trace!(
            %node,
            types = entry.types.len(),
            properties = entry.properties.len(),
            "indexed node"
        );
        entries.insert(node.clone(), entry);
        true
    }

    /// Remove `node` from every index. Returns true if it was indexed.
    pub fn remove_node(&self, node: &NodePath) -> bool {
        let mut entries = self.entries.lock();
        match entries.remove(node) {
            Some(entry) => {
                self.tables().remove(node, &entry);
                tracing::trace!(%node, "unindexed node");
                true
            }
            None => false,
        }
    }

    /// Re-index the whole store, replacing every table at once.
    ///
    /// Readers keep querying the old tables until the swap.
    pub fn rebuild<S: BackingStore + ?Sized>(&self, store: &S) -> RebuildReport {
        let mut entries = self.entries.lock();
        let fresh = Tables::new(self.shards);
        let mut fresh_entries = HashMap::new();
        for node in store.all_nodes() {
            let entry = self.compute_entry(store, &node);
            fresh.insert(&node, &entry);
            fresh_entries.insert(node, entry);
        }
        let mut dropped: Vec<NodePath> = entries
            .keys()
            .filter(|node| !fresh_entries.contains_key(*node))
            .cloned()
            .collect();
        dropped.sort();

        *self.tables.write() = Arc::new(fresh);
        *entries = fresh_entries;
        let report = RebuildReport { indexed: entries.len(), dropped };
        tracing::debug!(nodes = report.indexed, dropped = report.dropped.len(), "rebuilt property index");
        report
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.tables().clear();
        entries.clear();
    }

    fn compute_entry<S: BackingStore + ?Sized>(&self, store: &S, node: &NodePath) -> NodeEntry {
        let interner = self.interner();
        let mut types: Vec<Token> = Vec::new();
        let mut push_type = |token: &Token| {
            if !types.contains(token) {
                types.push(token.clone());
            }
        };

        if let Some(declared) = store.node_type_name(node) {
            match self.registry.get(&declared) {
                Some(handle) => handle.closure().for_each(&mut push_type),
                None => push_type(&interner.intern(&declared)),
            }
        }
        for applied in store.applied_traits(node) {
            match self.registry.resolve(&applied) {
                Some(handle) => handle.closure().for_each(&mut push_type),
                None => push_type(&interner.intern(&applied)),
            }
        }

        let names = store.property_names(node);
        let properties = interner.pre_intern(&names);
        let mut prefixes: Vec<String> = Vec::new();
        for name in &names {
            for (i, _) in name.match_indices(self.separator) {
                let prefix = &name[..i];
                if !prefix.is_empty() && !prefixes.iter().any(|p| p == prefix) {
                    prefixes.push(prefix.to_owned());
                }
            }
        }

        let relationships = store
            .relationships(node)
            .into_iter()
            .filter(|r| !r.is_empty())
            .map(|r| (r.name, r.targets))
            .collect();

        NodeEntry { types, properties, prefixes, relationships }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Nodes whose declared type or applied traits are, or inherit from,
    /// `type_name`.
    pub fn find_by_type(&self, type_name: &str) -> NodeSet {
        match self.interner().get(type_name) {
            Some(token) => self.tables().by_type.get(&token),
            None => NodeSet::new(),
        }
    }

    pub fn find_by_type_handle(&self, ty: &TypeHandle) -> NodeSet {
        self.tables().by_type.get(ty.name())
    }

    pub fn find_by_property(&self, name: &Token) -> NodeSet {
        self.tables().by_property.get(name)
    }

    pub fn find_by_property_name(&self, name: &str) -> NodeSet {
        match self.interner().get(name) {
            Some(token) => self.find_by_property(&token),
            None => NodeSet::new(),
        }
    }

    /// Nodes with a property under `prefix`.
    ///
    /// A namespace (`game` or `game:`) is answered from the prefix index.
    /// Anything else falls back to scanning property names with
    /// `starts_with`.
    pub fn find_by_property_prefix(&self, prefix: &str) -> NodeSet {
        let tables = self.tables();
        let namespace = prefix.strip_suffix(self.separator).unwrap_or(prefix);
        let key = namespace.to_owned();
        if tables.by_prefix.contains_key(&key) {
            return tables.by_prefix.get(&key);
        }
        let mut result = NodeSet::new();
        tables.by_property.for_each(|name, nodes| {
            if name.starts_with(prefix) {
                result.extend(nodes.iter().cloned());
            }
        });
        result
    }

    /// Sources of relationships pointing at `target`, grouped by
    /// relationship name. `name` restricts the result to one relationship.
    pub fn find_relationship_sources(&self, target: &NodePath, name: Option<&str>) -> RelationshipSources {
        self.tables().by_target.read(target, |sources| {
            let Some(sources) = sources else {
                return RelationshipSources::new();
            };
            match name {
                Some(name) => sources
                    .get(name)
                    .map(|set| RelationshipSources::from_iter([(name.to_owned(), set.clone())]))
                    .unwrap_or_default(),
                None => sources.clone(),
            }
        })
    }

    /// Targets of `source`'s relationship `name`, as of its last indexing.
    pub fn find_targets(&self, source: &NodePath, name: &str) -> Vec<NodePath> {
        self.entries
            .lock()
            .get(source)
            .and_then(|e| e.relationships.iter().find(|(n, _)| n == name))
            .map(|(_, targets)| targets.clone())
            .unwrap_or_default()
    }

    pub fn has_relationship(&self, source: &NodePath, name: &str) -> bool {
        self.entries
            .lock()
            .get(source)
            .is_some_and(|e| e.relationships.iter().any(|(n, _)| n == name))
    }

    /// True if any indexed relationship points at `target`.
    pub fn is_targeted(&self, target: &NodePath) -> bool {
        self.tables().by_target.contains_key(target)
    }

    /// Intersect several criteria, starting from the smallest candidate set.
    pub fn intersect(&self, criteria: &[Criterion]) -> NodeSet {
        let mut sets = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            let set = self.evaluate(criterion);
            if set.is_empty() {
                return NodeSet::new();
            }
            sets.push(set);
        }
        intersect_sets(sets)
    }

    pub fn evaluate(&self, criterion: &Criterion) -> NodeSet {
        match criterion {
            Criterion::Type(name) => self.find_by_type(name),
            Criterion::Property(name) => self.find_by_property_name(name),
            Criterion::PropertyPrefix(prefix) => self.find_by_property_prefix(prefix),
            Criterion::TargetOf { target, name } => self
                .find_relationship_sources(target, name.as_deref())
                .into_values()
                .flatten()
                .collect(),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Type keys `node` is indexed under (declared closure, then traits).
    pub fn types_of(&self, node: &NodePath) -> Vec<Token> {
        self.entries.lock().get(node).map(|e| e.types.clone()).unwrap_or_default()
    }

    pub fn properties_of(&self, node: &NodePath) -> Vec<Token> {
        self.entries.lock().get(node).map(|e| e.properties.clone()).unwrap_or_default()
    }

    pub fn count_by_type(&self, type_name: &str) -> usize {
        match self.interner().get(type_name) {
            Some(token) => self.tables().by_type.count(&token),
            None => 0,
        }
    }

    pub fn all_types(&self) -> Vec<Token> {
        let mut all = self.tables().by_type.keys();
        all.sort();
        all
    }

    pub fn all_property_names(&self) -> Vec<Token> {
        let mut all = self.tables().by_property.keys();
        all.sort();
        all
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, node: &NodePath) -> bool {
        self.entries.lock().contains_key(node)
    }

    /// Ordered copy of every index, for comparison and export.
    pub fn snapshot(&self) -> IndexSnapshot {
        let tables = self.tables();
        let mut snap = IndexSnapshot::default();
        tables.by_type.for_each(|k, v| {
            snap.types.insert(k.to_string(), v.iter().cloned().collect());
        });
        tables.by_property.for_each(|k, v| {
            snap.properties.insert(k.to_string(), v.iter().cloned().collect());
        });
        tables.by_prefix.for_each(|k, v| {
            snap.prefixes.insert(k.clone(), v.iter().cloned().collect());
        });
        tables.by_target.for_each(|target, sources| {
            let sources = sources
                .iter()
                .map(|(name, set)| (name.clone(), set.iter().cloned().collect()))
                .collect();
            snap.relationships.insert(target.clone(), sources);
        });
        snap
    }
}

impl std::fmt::Debug for PropertyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyIndex")
            .field("nodes", &self.len())
            .field("shards", &self.shards)
            .finish()
    }
}

/// Deterministic, serializable view of all four indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub types: BTreeMap<String, BTreeSet<NodePath>>,
    pub properties: BTreeMap<String, BTreeSet<NodePath>>,
    pub prefixes: BTreeMap<String, BTreeSet<NodePath>>,
    pub relationships: BTreeMap<NodePath, BTreeMap<String, BTreeSet<NodePath>>>,
}

impl IndexSnapshot {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.properties.is_empty()
            && self.prefixes.is_empty()
            && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaType;
    use crate::storage::MemoryStore;

    fn path(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    fn setup() -> (MemoryStore, PropertyIndex) {
        let registry = Arc::new(TypeRegistry::new(Arc::new(TokenInterner::new())));
        registry.register_all([
            SchemaType::typed("GameEntity"),
            SchemaType::typed("Enemy").inherits("GameEntity"),
            SchemaType::single_apply("HealthAPI"),
            SchemaType::multiple_apply("TeamAPI"),
        ]).unwrap();
        (MemoryStore::new(), PropertyIndex::new(registry, 4, ':'))
    }

    #[test]
    fn test_type_index_includes_ancestors_and_traits() {
        let (store, index) = setup();
        let a = path("/A");
        store.define_node(&a, Some("Enemy"));
        store.apply_trait(&a, "HealthAPI");
        store.apply_trait(&a, "TeamAPI:red");
        assert!(index.add_node(&store, &a));

        for name in ["Enemy", "GameEntity", "HealthAPI", "TeamAPI"] {
            assert!(index.find_by_type(name).contains(&a), "{name}");
        }
        assert!(index.find_by_type("TeamAPI:red").is_empty());
    }

    #[test]
    fn test_unregistered_type_indexed_by_raw_name() {
        let (store, index) = setup();
        let a = path("/A");
        store.define_node(&a, Some("Prop"));
        index.add_node(&store, &a);
        assert_eq!(index.count_by_type("Prop"), 1);
    }

    #[test]
    fn test_prefix_lookup() {
        let (store, index) = setup();
        let a = path("/A");
        let b = path("/B");
        store.define_node(&a, None);
        store.define_node(&b, None);
        store.define_property(&a, "game:health:current", 10.0).unwrap();
        store.define_property(&b, "game:ai:state", "idle").unwrap();
        store.define_property(&b, "gameplay", true).unwrap();
        index.rebuild(&store);

        assert_eq!(index.find_by_property_prefix("game").len(), 2);
        assert_eq!(index.find_by_property_prefix("game:").len(), 2);
        assert_eq!(index.find_by_property_prefix("game:health").len(), 1);
        // Not a namespace: raw starts_with scan.
        assert_eq!(index.find_by_property_prefix("gamep").len(), 1);
        assert!(index.find_by_property_prefix("physics").is_empty());
    }

    #[test]
    fn test_relationships() {
        let (store, index) = setup();
        let a = path("/A");
        let b = path("/B");
        let t = path("/Target");
        for p in [&a, &b, &t] {
            store.define_node(p, None);
        }
        store.add_relationship_target(&a, "game:target", &t).unwrap();
        store.add_relationship_target(&b, "game:follow", &t).unwrap();
        index.rebuild(&store);

        let all = index.find_relationship_sources(&t, None);
        assert_eq!(all.len(), 2);
        let only = index.find_relationship_sources(&t, Some("game:target"));
        assert_eq!(only.len(), 1);
        assert!(only["game:target"].contains(&a));
        assert_eq!(index.find_targets(&a, "game:target"), vec![t.clone()]);
        assert!(index.has_relationship(&b, "game:follow"));
        assert!(index.is_targeted(&t));
        assert!(!index.is_targeted(&a));

        index.remove_node(&a);
        index.remove_node(&b);
        assert!(!index.is_targeted(&t));
    }

    #[test]
    fn test_remove_is_inverse_of_add() {
        let (store, index) = setup();
        let a = path("/A");
        let b = path("/B");
        store.define_node(&a, Some("Enemy"));
        store.define_node(&b, Some("Enemy"));
        store.define_property(&b, "game:hp", 1i64).unwrap();
        index.add_node(&store, &a);
        let before = index.snapshot();

        store.apply_trait(&b, "HealthAPI");
        store.add_relationship_target(&b, "game:target", &a).unwrap();
        index.add_node(&store, &b);
        assert_ne!(index.snapshot(), before);
        index.remove_node(&b);
        assert_eq!(index.snapshot(), before);
    }

    #[test]
    fn test_readd_replaces_entry() {
        let (store, index) = setup();
        let a = path("/A");
        store.define_node(&a, None);
        store.apply_trait(&a, "HealthAPI");
        index.add_node(&store, &a);
        store.remove_trait(&a, "HealthAPI");
        index.add_node(&store, &a);
        assert!(index.find_by_type("HealthAPI").is_empty());
        assert!(!index.snapshot().types.contains_key("HealthAPI"));
    }

    #[test]
    fn test_add_missing_node_removes_it() {
        let (store, index) = setup();
        let a = path("/A");
        store.define_node(&a, None);
        index.add_node(&store, &a);
        store.remove_node(&a);
        assert!(!index.add_node(&store, &a));
        assert!(!index.contains(&a));
    }

    #[test]
    fn test_intersect_sets_smallest_first() {
        let a = path("/A");
        let b = path("/B");
        let c = path("/C");
        let big: NodeSet = [a.clone(), b.clone(), c.clone()].into_iter().collect();
        let small: NodeSet = [b.clone()].into_iter().collect();
        let result = intersect_sets(vec![big, small]);
        assert_eq!(result.len(), 1);
        assert!(result.contains(&b));
        assert!(intersect_sets(Vec::new()).is_empty());
    }

    #[test]
    fn test_rebuild_reports_dropped_nodes() {
        let (store, index) = setup();
        let (a, b, c) = (path("/A"), path("/B"), path("/C"));
        for p in [&a, &b, &c] {
            store.define_node(p, Some("Enemy"));
        }
        assert_eq!(index.rebuild(&store).indexed, 3);

        store.remove_node(&c);
        store.remove_node(&a);
        let report = index.rebuild(&store);
        assert_eq!(report, RebuildReport { indexed: 1, dropped: vec![a.clone(), c.clone()] });
        assert!(index.rebuild(&store).dropped.is_empty());
    }
}
