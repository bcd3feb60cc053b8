//! # Schema Types
//!
//! A node has at most one declared (primary) type and any number of applied
//! traits ("component schemas"). Both kinds live in one [`TypeRegistry`] and
//! both may inherit from other registered types.
//!
//! Registration is the only place inheritance is walked: each type's full
//! ancestor closure is computed once, when it is registered, and never
//! changes afterwards. Parents must be registered before their children, so
//! a closure can never contain a cycle.

pub mod cache;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::intern::TokenInterner;
use crate::model::Token;
use crate::{Error, Result};

pub use cache::SchemaTypeCache;

/// Separator between a multiple-apply trait and its instance name
/// (`TeamAPI:red`).
pub const INSTANCE_SEPARATOR: char = ':';

// ============================================================================
// Definitions
// ============================================================================

/// How a schema type attaches to nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaKind {
    /// Declared node type, resolved through `is_a`.
    Typed,
    /// Trait that can be applied at most once.
    SingleApplyTrait,
    /// Trait applied once per instance name (`Name:instance`).
    MultipleApplyTrait,
}

impl SchemaKind {
    pub fn is_trait(&self) -> bool {
        !matches!(self, SchemaKind::Typed)
    }
}

/// Registration input for one schema type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaType {
    pub name: String,
    pub parents: Vec<String>,
    pub kind: SchemaKind,
    pub is_abstract: bool,
}

impl SchemaType {
    pub fn typed(name: impl Into<String>) -> Self {
        Self::with_kind(name, SchemaKind::Typed)
    }

    pub fn single_apply(name: impl Into<String>) -> Self {
        Self::with_kind(name, SchemaKind::SingleApplyTrait)
    }

    pub fn multiple_apply(name: impl Into<String>) -> Self {
        Self::with_kind(name, SchemaKind::MultipleApplyTrait)
    }

    fn with_kind(name: impl Into<String>, kind: SchemaKind) -> Self {
        Self { name: name.into(), parents: Vec::new(), kind, is_abstract: false }
    }

    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

// ============================================================================
// TypeHandle
// ============================================================================

#[derive(Debug)]
struct TypeInfo {
    name: Token,
    kind: SchemaKind,
    is_abstract: bool,
    parents: Vec<TypeHandle>,
    /// Every proper ancestor, transitively.
    ancestors: HashSet<Token>,
}

/// Registered schema type. Cheap to clone; compares by identity.
#[derive(Clone)]
pub struct TypeHandle(Arc<TypeInfo>);

impl TypeHandle {
    pub fn name(&self) -> &Token {
        &self.0.name
    }

    pub fn kind(&self) -> SchemaKind {
        self.0.kind
    }

    pub fn is_abstract(&self) -> bool {
        self.0.is_abstract
    }

    pub fn is_trait(&self) -> bool {
        self.0.kind.is_trait()
    }

    pub fn is_multiple_apply(&self) -> bool {
        self.0.kind == SchemaKind::MultipleApplyTrait
    }

    pub fn parents(&self) -> &[TypeHandle] {
        &self.0.parents
    }

    /// Proper ancestors (not including `self`), unordered.
    pub fn ancestors(&self) -> impl Iterator<Item = &Token> {
        self.0.ancestors.iter()
    }

    /// `self` plus all ancestors.
    pub fn closure(&self) -> impl Iterator<Item = &Token> {
        std::iter::once(&self.0.name).chain(self.0.ancestors.iter())
    }

    pub fn closure_len(&self) -> usize {
        self.0.ancestors.len() + 1
    }

    /// True if `self` is `other` or inherits from it.
    pub fn is_a(&self, other: &TypeHandle) -> bool {
        self == other || self.0.ancestors.contains(&other.0.name)
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TypeHandle {}

impl Hash for TypeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle({}, {:?})", self.0.name, self.0.kind)
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

// ============================================================================
// TypeRegistry
// ============================================================================

/// All known schema types, keyed by interned name.
pub struct TypeRegistry {
    interner: Arc<TokenInterner>,
    types: RwLock<HashMap<Token, TypeHandle>>,
}

impl TypeRegistry {
    pub fn new(interner: Arc<TokenInterner>) -> Self {
        Self { interner, types: RwLock::new(HashMap::new()) }
    }

    /// Register a type. Its parents must already be registered.
    pub fn register(&self, def: SchemaType) -> Result<TypeHandle> {
        let name = self.interner.intern(&def.name);
        let mut types = self.types.write();
        if types.contains_key(&name) {
            return Err(Error::DuplicateType(def.name));
        }

        let mut parents = Vec::with_capacity(def.parents.len());
        let mut ancestors = HashSet::new();
        for parent_name in &def.parents {
            let parent = self.interner.get(parent_name)
                .and_then(|t| types.get(&t).cloned())
                .ok_or_else(|| Error::UnknownType(parent_name.clone()))?;
            ancestors.extend(parent.closure().cloned());
            parents.push(parent);
        }

        let handle = TypeHandle(Arc::new(TypeInfo {
            name: name.clone(),
            kind: def.kind,
            is_abstract: def.is_abstract,
            parents,
            ancestors,
        }));
        types.insert(name, handle.clone());
        tracing::trace!(type_name = %handle, closure = handle.closure_len(), "registered schema type");
        Ok(handle)
    }

    /// Register several types in order.
    pub fn register_all(&self, defs: impl IntoIterator<Item = SchemaType>) -> Result<Vec<TypeHandle>> {
        defs.into_iter().map(|d| self.register(d)).collect()
    }

    /// Resolve a type by exact name.
    pub fn get(&self, name: &str) -> Option<TypeHandle> {
        let token = self.interner.get(name)?;
        self.types.read().get(&token).cloned()
    }

    pub fn get_token(&self, name: &Token) -> Option<TypeHandle> {
        self.types.read().get(name).cloned()
    }

    /// Resolve a type name as it may appear on a node.
    ///
    /// `Name:instance` resolves to `Name` when `Name` is a multiple-apply
    /// trait; the instance name is returned alongside.
    pub fn resolve_applied(&self, name: &str) -> Option<(TypeHandle, Option<Token>)> {
        if let Some(handle) = self.get(name) {
            return Some((handle, None));
        }
        let (base, instance) = name.split_once(INSTANCE_SEPARATOR)?;
        let handle = self.get(base)?;
        if !handle.is_multiple_apply() || instance.is_empty() {
            return None;
        }
        Some((handle, Some(self.interner.intern(instance))))
    }

    /// Like [`resolve_applied`](Self::resolve_applied) but drops the instance.
    pub fn resolve(&self, name: &str) -> Option<TypeHandle> {
        self.resolve_applied(name).map(|(h, _)| h)
    }

    pub fn all_types(&self) -> Vec<TypeHandle> {
        let mut all: Vec<TypeHandle> = self.types.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn interner(&self) -> &Arc<TokenInterner> {
        &self.interner
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry").field("types", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new(Arc::new(TokenInterner::new()))
    }

    #[test]
    fn test_closure_is_transitive() {
        let reg = registry();
        let entity = reg.register(SchemaType::typed("GameEntity").abstract_type()).unwrap();
        let enemy = reg.register(SchemaType::typed("Enemy").inherits("GameEntity")).unwrap();
        let carrot = reg.register(SchemaType::typed("EnemyCarrot").inherits("Enemy")).unwrap();

        assert!(carrot.is_a(&enemy));
        assert!(carrot.is_a(&entity));
        assert!(carrot.is_a(&carrot));
        assert!(!entity.is_a(&carrot));
        assert_eq!(carrot.closure_len(), 3);
        assert!(entity.is_abstract());
    }

    #[test]
    fn test_unknown_parent_and_duplicate() {
        let reg = registry();
        assert!(matches!(
            reg.register(SchemaType::typed("Orphan").inherits("Missing")),
            Err(Error::UnknownType(_))
        ));
        reg.register(SchemaType::typed("A")).unwrap();
        assert!(matches!(reg.register(SchemaType::typed("A")), Err(Error::DuplicateType(_))));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_multiple_inheritance() {
        let reg = registry();
        reg.register(SchemaType::typed("Renderable")).unwrap();
        reg.register(SchemaType::typed("Collidable")).unwrap();
        let prop = reg.register(
            SchemaType::typed("Prop").inherits("Renderable").inherits("Collidable"),
        ).unwrap();
        let names: HashSet<&str> = prop.ancestors().map(|t| t.as_str()).collect();
        assert_eq!(names, HashSet::from_iter(["Renderable", "Collidable"]));
        assert_eq!(prop.parents().len(), 2);
    }

    #[test]
    fn test_resolve_multiple_apply_instance() {
        let reg = registry();
        reg.register(SchemaType::multiple_apply("TeamAPI")).unwrap();
        reg.register(SchemaType::single_apply("HealthAPI")).unwrap();

        let (team, instance) = reg.resolve_applied("TeamAPI:red").unwrap();
        assert_eq!(team.name().as_str(), "TeamAPI");
        assert_eq!(instance.unwrap().as_str(), "red");

        assert!(reg.resolve("HealthAPI:x").is_none(), "single-apply traits take no instance");
        assert!(reg.resolve("TeamAPI:").is_none());
        assert!(reg.resolve("Nope").is_none());
    }
}
