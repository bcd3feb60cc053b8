//! Typed, dirty-tracked property value.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::PropertyValue;
use crate::stats::CacheStats;
use crate::storage::RawHandle;

struct State<T> {
    value: T,
    dirty: bool,
    loaded: bool,
}

/// Decoded copy of one property plus a dirty flag.
///
/// `get`/`set`/`load`/`sync` on one instance are linearizable: each runs
/// under this value's own lock, so unrelated properties never contend.
///
/// `set` compares with `PartialEq` before marking dirty. Floats therefore
/// compare exactly, and a value that only drifts by rounding error is still
/// written back.
pub struct CachedValue<T: PropertyValue, H: RawHandle> {
    handle: Option<H>,
    default: T,
    state: RwLock<State<T>>,
    stats: Option<Arc<CacheStats>>,
}

impl<T: PropertyValue, H: RawHandle> CachedValue<T, H> {
    /// Unloaded value. `get` returns `default` until `load` or `set`.
    pub fn new(handle: Option<H>, default: T) -> Self {
        Self {
            handle,
            state: RwLock::new(State { value: default.clone(), dirty: false, loaded: false }),
            default,
            stats: None,
        }
    }

    /// Construct and immediately pull the current value from the store.
    pub fn loaded(handle: Option<H>, default: T) -> Self {
        let value = Self::new(handle, default);
        value.load();
        value
    }

    /// Clean value already decoded from `handle` by the caller.
    pub(crate) fn decoded(handle: Option<H>, value: T) -> Self {
        let cached = Self::new(handle, value);
        cached.state.write().loaded = true;
        cached
    }

    /// Value that starts out dirty, for a write that reached the cache
    /// before any read.
    pub(crate) fn pending(handle: Option<H>, value: T) -> Self {
        let cached = Self::new(handle, value);
        cached.state.write().dirty = true;
        cached
    }

    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    // ========================================================================
    // Access
    // ========================================================================

    pub fn get(&self) -> T {
        self.state.read().value.clone()
    }

    /// Borrow the cached value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read().value)
    }

    /// Store `value` and mark dirty, unless it equals the cached value.
    /// Returns true if the value changed.
    pub fn set(&self, value: T) -> bool {
        let mut state = self.state.write();
        if state.value == value {
            if let Some(stats) = &self.stats {
                stats.record_suppressed_write();
            }
            return false;
        }
        state.value = value;
        state.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// True once a `load` has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    // ========================================================================
    // Store round trips
    // ========================================================================

    /// Replace the cached value with the store's and clear dirty.
    ///
    /// Returns false if there is no handle, the property has no value, or
    /// it decodes to a different kind; the cached value then reverts to the
    /// default. Dirty is cleared either way.
    pub fn load(&self) -> bool {
        let mut state = self.state.write();
        let decoded = self.handle.as_ref().and_then(|h| {
            let raw = h.decode()?;
            let typed = T::from_value(&raw);
            if typed.is_none() {
                tracing::warn!(
                    property = h.name(),
                    got = raw.type_name(),
                    expected = T::KIND.map_or("ANY", |k| k.name()),
                    "type mismatch decoding cached value"
                );
            }
            typed
        });
        let ok = decoded.is_some();
        state.value = decoded.unwrap_or_else(|| self.default.clone());
        state.dirty = false;
        state.loaded = ok;
        if let Some(stats) = &self.stats {
            stats.record_load(ok);
        }
        ok
    }

    /// Write the cached value back if dirty.
    ///
    /// Clean values succeed without touching the store. On rejection the
    /// value stays dirty so a later sync retries.
    pub fn sync(&self) -> bool {
        let mut state = self.state.write();
        if !state.dirty {
            return true;
        }
        let ok = match &self.handle {
            Some(handle) => handle.encode(&state.value.clone().into_value()),
            None => false,
        };
        if ok {
            state.dirty = false;
        } else {
            tracing::warn!(
                property = self.handle.as_ref().map_or("<unresolved>", |h| h.name()),
                "backing store rejected write; value stays dirty"
            );
        }
        if let Some(stats) = &self.stats {
            stats.record_sync(ok);
        }
        ok
    }
}

impl<T: PropertyValue + fmt::Debug, H: RawHandle> fmt::Debug for CachedValue<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("CachedValue")
            .field("property", &self.handle.as_ref().map(|h| h.name().to_owned()))
            .field("value", &state.value)
            .field("dirty", &state.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::TokenInterner;
    use crate::model::{NodePath, Value};
    use crate::storage::{BackingStore, MemoryHandle, MemoryStore};

    fn setup(value: impl Into<Value>) -> (MemoryStore, MemoryHandle) {
        let store = MemoryStore::new();
        let interner = TokenInterner::new();
        let node = NodePath::new("/Enemy").unwrap();
        store.define_node(&node, None);
        store.define_property(&node, "game:health:current", value).unwrap();
        let handle = store.get_property(&node, &interner.intern("game:health:current")).unwrap();
        (store, handle)
    }

    #[test]
    fn test_default_until_loaded() {
        let (_store, handle) = setup(80.0);
        let value = CachedValue::new(Some(handle), 100.0f64);
        assert_eq!(value.get(), 100.0);
        assert!(!value.is_dirty());
        assert!(value.load());
        assert_eq!(value.get(), 80.0);
        assert!(value.is_loaded());
    }

    #[test]
    fn test_set_same_value_is_not_dirty() {
        let (store, handle) = setup(80.0);
        let value = CachedValue::loaded(Some(handle), 0.0f64);
        assert!(!value.set(80.0));
        assert!(!value.is_dirty());
        assert!(value.sync());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_set_sync_load_roundtrip() {
        let (store, handle) = setup(80.0);
        let value = CachedValue::loaded(Some(handle), 0.0f64);
        assert!(value.set(55.5));
        assert!(value.is_dirty());
        assert!(value.sync());
        assert!(!value.is_dirty());
        assert!(value.load());
        assert_eq!(value.get(), 55.5);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_failed_sync_keeps_dirty() {
        let (store, handle) = setup(80.0);
        let node = NodePath::new("/Enemy").unwrap();
        store.set_read_only(&node, "game:health:current", true).unwrap();
        let value = CachedValue::loaded(Some(handle), 0.0f64);
        value.set(1.0);
        assert!(!value.sync());
        assert!(value.is_dirty());

        store.set_read_only(&node, "game:health:current", false).unwrap();
        assert!(value.sync());
        assert!(!value.is_dirty());
    }

    #[test]
    fn test_load_type_mismatch_falls_back_to_default() {
        let (_store, handle) = setup("not a number");
        let value = CachedValue::new(Some(handle), 7i64);
        assert!(!value.load());
        assert_eq!(value.get(), 7);
        assert!(!value.is_loaded());
    }

    #[test]
    fn test_no_handle() {
        let value: CachedValue<i64, MemoryHandle> = CachedValue::new(None, 3);
        assert!(!value.load());
        assert!(value.sync(), "clean value syncs trivially");
        value.set(4);
        assert!(!value.sync());
        assert!(value.is_dirty());
    }

    #[test]
    fn test_stats_recorded() {
        let (_store, handle) = setup(1i64);
        let stats = Arc::new(CacheStats::new());
        let value = CachedValue::loaded(Some(handle), 0i64).with_stats(Arc::clone(&stats));
        value.load();
        value.set(1);
        value.set(2);
        value.sync();
        let snap = stats.snapshot();
        assert_eq!(snap.loads, 1);
        assert_eq!(snap.suppressed_writes, 1);
        assert_eq!(snap.syncs, 1);
    }
}
