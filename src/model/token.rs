//! Token: an interned, cheaply comparable name.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Interned name handle.
///
/// Tokens are only created by [`TokenInterner`](crate::intern::TokenInterner),
/// which guarantees one allocation per distinct string. Equality and hashing
/// therefore use the allocation address, never the string contents.
#[derive(Clone)]
pub struct Token(Arc<str>);

impl Token {
    pub(crate) fn from_interned(text: Arc<str>) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Portion before the first `separator`, or `""` when there is none.
    pub fn namespace(&self, separator: char) -> &str {
        match self.0.find(separator) {
            Some(i) => &self.0[..i],
            None => "",
        }
    }

    /// Address identity, exposed for diagnostics and tests.
    pub fn ptr_eq(&self, other: &Token) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// Orders by text, breaking ties on address so that `Ord` agrees with `Eq`
/// even for tokens from two different interners.
impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str()
            .cmp(other.as_str())
            .then_with(|| self.addr().cmp(&other.addr()))
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Deref for Token {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?})", &*self.0)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_contents() {
        let a = Token::from_interned(Arc::from("game:health"));
        let b = Token::from_interned(Arc::from("game:health"));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_namespace() {
        let t = Token::from_interned(Arc::from("game:health:current"));
        assert_eq!(t.namespace(':'), "game");
        let plain = Token::from_interned(Arc::from("visibility"));
        assert_eq!(plain.namespace(':'), "");
    }
}
