//! NodePath: the stable address of a node in the scene graph.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Absolute, `/`-separated node address (e.g. `/World/Enemies/Carrot_01`).
///
/// Cloning is a refcount bump, so paths can be used freely as keys in every
/// per-node cache and index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Arc<str>);

impl NodePath {
    /// Parse and validate an absolute path.
    ///
    /// Rejects relative paths, empty segments (`//`), trailing separators and
    /// `.`/`..` segments.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref();
        if path == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = path.strip_prefix('/') else {
            return Err(Error::InvalidPath(format!("{path}: must be absolute")));
        };
        for segment in rest.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidPath(format!("{path}: bad segment '{segment}'")));
            }
        }
        Ok(Self(Arc::from(path)))
    }

    /// The pseudo-root `/`.
    pub fn root() -> Self {
        Self(Arc::from("/"))
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment; empty for the root.
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[i + 1..],
            None => "",
        }
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(i) => Some(Self(Arc::from(&self.0[..i]))),
            None => None,
        }
    }

    /// Append a single child segment.
    pub fn child(&self, name: &str) -> Result<NodePath> {
        if self.is_root() {
            Self::new(format!("/{name}"))
        } else {
            Self::new(format!("{}/{name}", self.0))
        }
    }

    /// True if `self` is `other` or lies below it.
    pub fn has_prefix(&self, other: &NodePath) -> bool {
        if other.is_root() {
            return true;
        }
        match self.0.strip_prefix(&*other.0) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({})", self.0)
    }
}

impl TryFrom<&str> for NodePath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodePath::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let p = NodePath::new("/World/Enemies/Carrot").unwrap();
        assert_eq!(p.name(), "Carrot");
        assert_eq!(p.parent().unwrap().as_str(), "/World/Enemies");
        assert_eq!(NodePath::new("/World").unwrap().parent(), Some(NodePath::root()));
        assert_eq!(NodePath::root().parent(), None);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(NodePath::new("World").is_err());
        assert!(NodePath::new("/World/").is_err());
        assert!(NodePath::new("/World//A").is_err());
        assert!(NodePath::new("/World/../A").is_err());
    }

    #[test]
    fn test_child_and_prefix() {
        let world = NodePath::new("/World").unwrap();
        let a = world.child("A").unwrap();
        assert_eq!(a.as_str(), "/World/A");
        assert!(a.has_prefix(&world));
        assert!(!NodePath::new("/WorldX").unwrap().has_prefix(&world));
        assert!(a.has_prefix(&NodePath::root()));
        assert_eq!(NodePath::root().child("X").unwrap().as_str(), "/X");
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let p = NodePath::new("/A/B").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/A/B\"");
        assert_eq!(serde_json::from_str::<NodePath>(&json).unwrap(), p);
        assert!(serde_json::from_str::<NodePath>("\"relative\"").is_err());
    }
}
