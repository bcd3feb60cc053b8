//! # Scene Model
//!
//! Plain data shared by every layer: node addresses, interned names,
//! decoded property values and relationships.
//!
//! Design rule: no locks, no caches, no store access here.

pub mod path;
pub mod token;
pub mod value;
pub mod relationship;

pub use path::NodePath;
pub use token::Token;
pub use value::{PropertyValue, Value, ValueKind, VectorData, VECTOR_INLINE};
pub use relationship::Relationship;
