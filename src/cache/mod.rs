//! # Property Caches
//!
//! Point access to node properties without going through the store's
//! name-based lookup every frame.
//!
//! - [`NodePropertyCache`]: per-node handle cache (grouped by namespace) and
//!   owner of every cached value.
//! - [`CachedValue`]: decoded copy of one property with a dirty flag and
//!   explicit `load`/`sync` round trips.

pub mod handles;
pub mod value;

pub use handles::{NodePropertyCache, SyncReport, ValueSlot};
pub use value::CachedValue;
