//! In-memory backing store.
//!
//! This is the reference implementation of `BackingStore`.
//! It uses a single HashMap of node records protected by an RwLock.
//!
//! ## Limitations
//!
//! - **No composition**: what you author is what you read. There is no
//!   layering, no inheritance of opinions, no variants.
//! - **Coarse locking**: one lock for the whole scene. Fine for tests and
//!   small embedded scenes, which is all this store is for.
//!
//! Use this store for:
//! - Testing the caches, indices and coordinator
//! - Embedding in tools that keep the scene in memory anyway

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::*;
use crate::{Error, Result};
use super::{BackingStore, RawHandle, StoreCapabilities};

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory scene graph. Cloning shares the same scene.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodePath, NodeRecord>>,
    /// Accepted `encode` calls
    writes: AtomicU64,
    /// Rejected `encode` calls
    rejected_writes: AtomicU64,
}

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    type_name: Option<String>,
    traits: Vec<String>,
    properties: BTreeMap<String, PropertySlot>,
    relationships: BTreeMap<String, Vec<NodePath>>,
}

#[derive(Debug, Clone)]
struct PropertySlot {
    kind: ValueKind,
    value: Option<Value>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                writes: AtomicU64::new(0),
                rejected_writes: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Create (or retype) a node.
    pub fn define_node(&self, path: &NodePath, type_name: Option<&str>) {
        let mut nodes = self.inner.nodes.write();
        let record = nodes.entry(path.clone()).or_default();
        record.type_name = type_name.map(str::to_owned);
    }

    /// Remove a node. Returns true if it existed.
    pub fn remove_node(&self, path: &NodePath) -> bool {
        self.inner.nodes.write().remove(path).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.read().len()
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Author a property with a value; its kind is taken from the value.
    pub fn define_property(&self, path: &NodePath, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_node(path, |record| {
            record.properties.insert(name.to_owned(), PropertySlot {
                kind: value.kind(),
                value: Some(value),
                read_only: false,
            });
        })
    }

    /// Declare a typed property without a value.
    pub fn declare_property(&self, path: &NodePath, name: &str, kind: ValueKind) -> Result<()> {
        self.with_node(path, |record| {
            record.properties.insert(name.to_owned(), PropertySlot {
                kind,
                value: None,
                read_only: false,
            });
        })
    }

    pub fn set_read_only(&self, path: &NodePath, name: &str, read_only: bool) -> Result<()> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes.get_mut(path).ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        let slot = record.properties.get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("property {path}.{name}")))?;
        slot.read_only = read_only;
        Ok(())
    }

    pub fn remove_property(&self, path: &NodePath, name: &str) -> Result<bool> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes.get_mut(path).ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        Ok(record.properties.remove(name).is_some())
    }

    /// Read a value straight from the scene, bypassing any handle.
    pub fn value(&self, path: &NodePath, name: &str) -> Option<Value> {
        self.inner.nodes.read()
            .get(path)
            .and_then(|r| r.properties.get(name))
            .and_then(|s| s.value.clone())
    }

    /// Overwrite a value as an outside editor would (ignores read-only and
    /// does not count as a cache write).
    pub fn write_value(&self, path: &NodePath, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut nodes = self.inner.nodes.write();
        let record = nodes.get_mut(path).ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        let slot = record.properties.get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("property {path}.{name}")))?;
        if slot.kind != value.kind() {
            return Err(Error::TypeMismatch {
                expected: slot.kind.name().into(),
                got: value.type_name().into(),
            });
        }
        slot.value = Some(value);
        Ok(())
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn add_relationship_target(&self, path: &NodePath, rel: &str, target: &NodePath) -> Result<()> {
        self.with_node(path, |record| {
            let targets = record.relationships.entry(rel.to_owned()).or_default();
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        })
    }

    pub fn remove_relationship_target(&self, path: &NodePath, rel: &str, target: &NodePath) -> Result<bool> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes.get_mut(path).ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        let Some(targets) = record.relationships.get_mut(rel) else {
            return Ok(false);
        };
        let before = targets.len();
        targets.retain(|t| t != target);
        let removed = targets.len() != before;
        if targets.is_empty() {
            record.relationships.remove(rel);
        }
        Ok(removed)
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Number of writes accepted through handles.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    /// Number of writes rejected through handles.
    pub fn rejected_write_count(&self) -> u64 {
        self.inner.rejected_writes.load(Ordering::Relaxed)
    }

    fn with_node(&self, path: &NodePath, f: impl FnOnce(&mut NodeRecord)) -> Result<()> {
        let mut nodes = self.inner.nodes.write();
        let record = nodes.get_mut(path).ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        f(record);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryHandle
// ============================================================================

/// Handle to one property slot in a `MemoryStore`.
///
/// Holds the address, not the slot, so it keeps working across unrelated
/// scene edits and fails cleanly once the property or node disappears.
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<MemoryInner>,
    node: NodePath,
    name: String,
}

impl std::fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryHandle({}.{})", self.node, self.name)
    }
}

impl RawHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> Option<ValueKind> {
        self.inner.nodes.read()
            .get(&self.node)
            .and_then(|r| r.properties.get(&self.name))
            .map(|s| s.kind)
    }

    fn decode(&self) -> Option<Value> {
        self.inner.nodes.read()
            .get(&self.node)
            .and_then(|r| r.properties.get(&self.name))
            .and_then(|s| s.value.clone())
    }

    fn encode(&self, value: &Value) -> bool {
        let mut nodes = self.inner.nodes.write();
        let slot = nodes.get_mut(&self.node).and_then(|r| r.properties.get_mut(&self.name));
        let accepted = match slot {
            Some(slot) if !slot.read_only && slot.kind == value.kind() => {
                slot.value = Some(value.clone());
                true
            }
            _ => false,
        };
        let counter = if accepted { &self.inner.writes } else { &self.inner.rejected_writes };
        counter.fetch_add(1, Ordering::Relaxed);
        accepted
    }
}

// ============================================================================
// BackingStore impl
// ============================================================================

impl BackingStore for MemoryStore {
    type Handle = MemoryHandle;

    fn get_property(&self, node: &NodePath, name: &Token) -> Option<MemoryHandle> {
        let nodes = self.inner.nodes.read();
        let record = nodes.get(node)?;
        if !record.properties.contains_key(name.as_str()) {
            return None;
        }
        Some(MemoryHandle {
            inner: Arc::clone(&self.inner),
            node: node.clone(),
            name: name.as_str().to_owned(),
        })
    }

    fn contains_node(&self, node: &NodePath) -> bool {
        self.inner.nodes.read().contains_key(node)
    }

    fn node_type_name(&self, node: &NodePath) -> Option<String> {
        self.inner.nodes.read().get(node).and_then(|r| r.type_name.clone())
    }

    fn applied_traits(&self, node: &NodePath) -> Vec<String> {
        self.inner.nodes.read().get(node).map(|r| r.traits.clone()).unwrap_or_default()
    }

    fn property_names(&self, node: &NodePath) -> Vec<String> {
        self.inner.nodes.read()
            .get(node)
            .map(|r| r.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn relationships(&self, node: &NodePath) -> Vec<Relationship> {
        self.inner.nodes.read()
            .get(node)
            .map(|r| {
                r.relationships.iter()
                    .map(|(name, targets)| Relationship { name: name.clone(), targets: targets.clone() })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all_nodes(&self) -> Box<dyn Iterator<Item = NodePath> + '_> {
        let mut paths: Vec<NodePath> = self.inner.nodes.read().keys().cloned().collect();
        paths.sort();
        Box::new(paths.into_iter())
    }

    fn set_type_name(&self, node: &NodePath, type_name: Option<&str>) -> bool {
        self.with_node(node, |r| r.type_name = type_name.map(str::to_owned)).is_ok()
    }

    fn apply_trait(&self, node: &NodePath, trait_name: &str) -> bool {
        self.with_node(node, |r| {
            if !r.traits.iter().any(|t| t == trait_name) {
                r.traits.push(trait_name.to_owned());
            }
        })
        .is_ok()
    }

    fn remove_trait(&self, node: &NodePath, trait_name: &str) -> bool {
        let mut nodes = self.inner.nodes.write();
        let Some(record) = nodes.get_mut(node) else {
            return false;
        };
        let before = record.traits.len();
        record.traits.retain(|t| t != trait_name);
        record.traits.len() != before
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities { writable: true, schema_mutation: true }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::TokenInterner;

    fn path(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    #[test]
    fn test_define_and_read_property() {
        let store = MemoryStore::new();
        let interner = TokenInterner::new();
        let a = path("/World/A");
        store.define_node(&a, Some("Enemy"));
        store.define_property(&a, "game:health:current", 100.0).unwrap();

        let handle = store.get_property(&a, &interner.intern("game:health:current")).unwrap();
        assert_eq!(handle.kind(), Some(ValueKind::Float));
        assert_eq!(handle.decode_as::<f64>(), Some(100.0));
        assert_eq!(store.node_type_name(&a).as_deref(), Some("Enemy"));
    }

    #[test]
    fn test_missing_property_has_no_handle() {
        let store = MemoryStore::new();
        let interner = TokenInterner::new();
        let a = path("/A");
        store.define_node(&a, None);
        assert!(store.get_property(&a, &interner.intern("nope")).is_none());
        assert!(store.get_property(&path("/B"), &interner.intern("nope")).is_none());
    }

    #[test]
    fn test_encode_rejections() {
        let store = MemoryStore::new();
        let interner = TokenInterner::new();
        let a = path("/A");
        store.define_node(&a, None);
        store.define_property(&a, "hp", 10i64).unwrap();
        let handle = store.get_property(&a, &interner.intern("hp")).unwrap();

        assert!(!handle.encode(&Value::Float(1.0)), "kind mismatch must be rejected");
        store.set_read_only(&a, "hp", true).unwrap();
        assert!(!handle.encode(&Value::Int(5)), "read-only must be rejected");
        store.set_read_only(&a, "hp", false).unwrap();
        assert!(handle.encode(&Value::Int(5)));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.rejected_write_count(), 2);

        store.remove_node(&a);
        assert!(!handle.encode(&Value::Int(6)));
        assert_eq!(handle.decode(), None);
    }

    #[test]
    fn test_declared_property_without_value() {
        let store = MemoryStore::new();
        let interner = TokenInterner::new();
        let a = path("/A");
        store.define_node(&a, None);
        store.declare_property(&a, "speed", ValueKind::Float).unwrap();
        let handle = store.get_property(&a, &interner.intern("speed")).unwrap();
        assert_eq!(handle.decode(), None);
        assert!(handle.encode_as(3.5f32));
        assert_eq!(handle.decode_as::<f32>(), Some(3.5));
    }

    #[test]
    fn test_traits_and_relationships() {
        let store = MemoryStore::new();
        let a = path("/A");
        let b = path("/B");
        store.define_node(&a, None);
        store.define_node(&b, None);

        assert!(store.apply_trait(&a, "HealthAPI"));
        assert!(store.apply_trait(&a, "HealthAPI"));
        assert_eq!(store.applied_traits(&a), vec!["HealthAPI".to_string()]);
        assert!(store.remove_trait(&a, "HealthAPI"));
        assert!(!store.remove_trait(&a, "HealthAPI"));

        store.add_relationship_target(&a, "target", &b).unwrap();
        let rels = store.relationships(&a);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].targets, vec![b.clone()]);
        assert!(store.remove_relationship_target(&a, "target", &b).unwrap());
        assert!(store.relationships(&a).is_empty());
    }

    #[test]
    fn test_all_nodes_sorted() {
        let store = MemoryStore::new();
        store.define_node(&path("/B"), None);
        store.define_node(&path("/A"), None);
        let all: Vec<_> = store.all_nodes().collect();
        assert_eq!(all, vec![path("/A"), path("/B")]);
    }
}
