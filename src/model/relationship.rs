//! Relationship: a named, one-to-many directed edge.

use serde::{Deserialize, Serialize};
use super::NodePath;

/// A named relationship from one source node to zero or more targets,
/// as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub targets: Vec<NodePath>,
}

impl Relationship {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), targets: Vec::new() }
    }

    pub fn with_target(mut self, target: NodePath) -> Self {
        self.targets.push(target);
        self
    }

    pub fn targets(&self) -> &[NodePath] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
