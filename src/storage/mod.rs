//! # Backing Store Contract
//!
//! The scene-graph store the caches sit in front of. Loading, saving and
//! composition all happen on the far side of this trait; the engine only
//! needs point reads/writes of properties plus enough structure to build
//! its indices.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory scene for tests and embedding |

pub mod memory;

use crate::model::*;

pub use memory::{MemoryHandle, MemoryStore};

// ============================================================================
// Store capabilities
// ============================================================================

/// What a store supports beyond plain reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// `RawHandle::encode` can succeed.
    pub writable: bool,
    /// `set_type_name` / `apply_trait` / `remove_trait` are implemented.
    pub schema_mutation: bool,
}

// ============================================================================
// RawHandle
// ============================================================================

/// Accessor for one property of one node inside the backing store.
///
/// Handles are resolved once (by name) and then reused for every read and
/// write, which is the whole point of the handle cache.
pub trait RawHandle: Clone + Send + Sync + 'static {
    /// Full property name.
    fn name(&self) -> &str;

    /// Declared kind of the property, if the store knows it.
    fn kind(&self) -> Option<ValueKind>;

    /// Current value. `None` if the property has no value or vanished.
    fn decode(&self) -> Option<Value>;

    /// Write a value. `false` if the store rejected it (read-only property,
    /// kind mismatch, node removed).
    fn encode(&self, value: &Value) -> bool;

    /// Decode as a concrete type; `None` on kind mismatch.
    fn decode_as<T: PropertyValue>(&self) -> Option<T> {
        self.decode().and_then(|v| T::from_value(&v))
    }

    fn encode_as<T: PropertyValue>(&self, value: T) -> bool {
        self.encode(&value.into_value())
    }
}

// ============================================================================
// BackingStore
// ============================================================================

/// Read/query interface into the scene graph.
///
/// All methods are point queries that must tolerate concurrent callers.
/// Absent nodes answer with `None`/empty results, never panics.
pub trait BackingStore: Send + Sync + 'static {
    type Handle: RawHandle;

    /// Resolve a property accessor by full name.
    fn get_property(&self, node: &NodePath, name: &Token) -> Option<Self::Handle>;

    fn contains_node(&self, node: &NodePath) -> bool;

    /// Declared (primary) type name; `None` for untyped or absent nodes.
    fn node_type_name(&self, node: &NodePath) -> Option<String>;

    /// Applied trait names in application order. Multiple-apply traits are
    /// reported as `Name:instance`.
    fn applied_traits(&self, node: &NodePath) -> Vec<String>;

    /// Names of every property authored on the node.
    fn property_names(&self, node: &NodePath) -> Vec<String>;

    /// Outgoing relationships of the node.
    fn relationships(&self, node: &NodePath) -> Vec<Relationship>;

    /// Full-graph enumeration. Only used while (re)building indices.
    fn all_nodes(&self) -> Box<dyn Iterator<Item = NodePath> + '_>;

    // ========================================================================
    // Schema mutation (optional)
    // ========================================================================

    /// Change the declared type. Default: unsupported.
    fn set_type_name(&self, _node: &NodePath, _type_name: Option<&str>) -> bool {
        false
    }

    /// Apply a trait. Default: unsupported.
    fn apply_trait(&self, _node: &NodePath, _trait_name: &str) -> bool {
        false
    }

    /// Remove a trait. Default: unsupported.
    fn remove_trait(&self, _node: &NodePath, _trait_name: &str) -> bool {
        false
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }
}
