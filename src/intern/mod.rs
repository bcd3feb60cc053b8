//! # Token Interner
//!
//! Maps name strings to [`Token`]s. Interning is append-only: a token, once
//! handed out, stays valid and unique for the life of its interner.
//!
//! The shared table sits behind a reader/writer lock because almost every
//! call is a hit. Worker threads can additionally front it with a
//! thread-local cache ([`TokenInterner::intern_cached`]) so that hot loops
//! never touch the shared lock at all.

use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::Token;

static NEXT_INTERNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// interner id -> (liveness marker, name -> token)
    static LOCAL_TOKENS: RefCell<HashMap<u64, ThreadCache>> = RefCell::new(HashMap::new());
}

struct ThreadCache {
    owner: Weak<()>,
    tokens: HashMap<Box<str>, Token>,
}

// ============================================================================
// TokenInterner
// ============================================================================

/// Thread-safe string interner.
///
/// Constructed explicitly and shared by `Arc`; there is no process-global
/// instance, so tests can run against isolated interners.
///
/// Dropping an interner clears the dropping thread's private cache. Other
/// threads release theirs when they exit or the next time they start
/// caching for a different interner.
pub struct TokenInterner {
    id: u64,
    alive: Arc<()>,
    tokens: RwLock<HashMap<Arc<str>, Token>>,
}

impl TokenInterner {
    pub fn new() -> Self {
        Self {
            id: NEXT_INTERNER_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Return the unique token for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> Token {
        if let Some(token) = self.tokens.read().get(name) {
            return token.clone();
        }

        let mut tokens = self.tokens.write();
        // Another thread may have won the race between the two locks.
        if let Some(token) = tokens.get(name) {
            return token.clone();
        }
        let text: Arc<str> = Arc::from(name);
        let token = Token::from_interned(Arc::clone(&text));
        tokens.insert(text, token.clone());
        token
    }

    /// Intern through this thread's private cache first.
    ///
    /// Intended for pool workers that resolve the same handful of names for
    /// every node they touch.
    pub fn intern_cached(&self, name: &str) -> Token {
        let cached = LOCAL_TOKENS.try_with(|local| {
            let mut local = local.borrow_mut();
            if !local.contains_key(&self.id) {
                // Caches of dropped interners.
                local.retain(|_, cache| cache.owner.strong_count() > 0);
                local.insert(self.id, ThreadCache {
                    owner: Arc::downgrade(&self.alive),
                    tokens: HashMap::new(),
                });
            }
            let Some(cache) = local.get_mut(&self.id) else {
                return self.intern(name);
            };
            if let Some(token) = cache.tokens.get(name) {
                return token.clone();
            }
            let token = self.intern(name);
            cache.tokens.insert(Box::from(name), token.clone());
            token
        });
        // Thread-locals are gone during thread teardown.
        cached.unwrap_or_else(|_| self.intern(name))
    }

    /// Drop this thread's private cache for this interner.
    pub fn clear_thread_cache(&self) {
        let _ = LOCAL_TOKENS.try_with(|local| {
            local.borrow_mut().remove(&self.id);
        });
    }

    /// Number of tokens in this thread's private cache.
    pub fn thread_cache_len(&self) -> usize {
        LOCAL_TOKENS
            .try_with(|local| local.borrow().get(&self.id).map_or(0, |c| c.tokens.len()))
            .unwrap_or(0)
    }

    /// Look up an existing token without creating one.
    pub fn get(&self, name: &str) -> Option<Token> {
        self.tokens.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tokens.read().contains_key(name)
    }

    /// Intern a batch under a single exclusive section for all misses.
    pub fn pre_intern<I, S>(&self, names: I) -> Vec<Token>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        let mut out = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        {
            let tokens = self.tokens.read();
            for (i, name) in names.iter().enumerate() {
                match tokens.get(name.as_ref()) {
                    Some(token) => out.push(Some(token.clone())),
                    None => {
                        out.push(None);
                        missing.push(i);
                    }
                }
            }
        }
        if !missing.is_empty() {
            let mut tokens = self.tokens.write();
            for i in missing {
                let name = names[i].as_ref();
                let token = match tokens.get(name) {
                    Some(token) => token.clone(),
                    None => {
                        let text: Arc<str> = Arc::from(name);
                        let token = Token::from_interned(Arc::clone(&text));
                        tokens.insert(text, token.clone());
                        token
                    }
                };
                out[i] = Some(token);
            }
        }
        out.into_iter().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interners with a private cache on the calling thread, dead ones included.
#[cfg(test)]
fn thread_cache_owners() -> usize {
    LOCAL_TOKENS.try_with(|local| local.borrow().len()).unwrap_or(0)
}

impl Default for TokenInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokenInterner {
    fn drop(&mut self) {
        self.clear_thread_cache();
    }
}

impl std::fmt::Debug for TokenInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenInterner")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// TokenGroup
// ============================================================================

/// Named set of related property tokens, e.g. every `game:health:*` name a
/// health component reads each frame.
///
/// Entries are `(alias, full name)` pairs; the alias is the short name code
/// uses to pick a token out of the group.
#[derive(Debug, Clone)]
pub struct TokenGroup {
    name: String,
    entries: Vec<(String, Token)>,
}

impl TokenGroup {
    pub fn new<'a, I>(interner: &TokenInterner, name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (aliases, full): (Vec<&str>, Vec<&str>) = entries.into_iter().unzip();
        let tokens = interner.pre_intern(full);
        Self {
            name: name.into(),
            entries: aliases.into_iter().map(str::to_owned).zip(tokens).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, alias: &str) -> Option<&Token> {
        self.entries.iter().find(|(a, _)| a == alias).map(|(_, t)| t)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(a, _)| a.as_str())
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries.iter().map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_identity() {
        let interner = TokenInterner::new();
        let a = interner.intern("game:health:current");
        let b = interner.intern("game:health:current");
        assert!(a.ptr_eq(&b));
        assert_eq!(interner.len(), 1);
        assert_ne!(a, interner.intern("game:health:maximum"));
    }

    #[test]
    fn test_get_does_not_insert() {
        let interner = TokenInterner::new();
        assert!(interner.get("missing").is_none());
        assert!(interner.is_empty());
        let t = interner.intern("present");
        assert_eq!(interner.get("present"), Some(t));
    }

    #[test]
    fn test_intern_across_threads() {
        let interner = Arc::new(TokenInterner::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let interner = Arc::clone(&interner);
                thread::spawn(move || {
                    (0..100).map(|i| interner.intern(&format!("prop{i}"))).collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<Token>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            for (a, b) in results[0].iter().zip(other) {
                assert!(a.ptr_eq(b));
            }
        }
        assert_eq!(interner.len(), 100);
    }

    #[test]
    fn test_thread_cache_agrees_with_shared_table() {
        let interner = TokenInterner::new();
        let cached = interner.intern_cached("speed");
        assert_eq!(interner.thread_cache_len(), 1);
        assert_eq!(cached, interner.intern("speed"));
        assert_eq!(interner.intern_cached("speed"), cached);
        interner.clear_thread_cache();
        assert_eq!(interner.thread_cache_len(), 0);
    }

    #[test]
    fn test_thread_caches_are_per_interner() {
        let a = TokenInterner::new();
        let b = TokenInterner::new();
        let ta = a.intern_cached("x");
        let tb = b.intern_cached("x");
        assert_ne!(ta, tb);
        assert_eq!(a.intern("x"), ta);
        assert_eq!(b.intern("x"), tb);
    }

    #[test]
    fn test_pre_intern_preserves_order() {
        let interner = TokenInterner::new();
        let existing = interner.intern("b");
        let tokens = interner.pre_intern(["a", "b", "c"]);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1], existing);
        assert_eq!(tokens[0].as_str(), "a");
        assert_eq!(tokens[2].as_str(), "c");
    }

    #[test]
    fn test_token_group() {
        let interner = TokenInterner::new();
        let group = TokenGroup::new(&interner, "Health", [
            ("current", "game:health:current"),
            ("maximum", "game:health:maximum"),
        ]);
        assert_eq!(group.name(), "Health");
        assert_eq!(group.len(), 2);
        assert_eq!(group.get("current"), Some(&interner.intern("game:health:current")));
        assert!(group.get("regen").is_none());
    }

    #[test]
    fn test_dead_interner_cache_pruned_on_next_use() {
        let a = Arc::new(TokenInterner::new());
        a.intern_cached("x");
        let before = thread_cache_owners();

        // Dropped elsewhere: this thread still holds the cache.
        let elsewhere = Arc::clone(&a);
        drop(a);
        std::thread::spawn(move || drop(elsewhere)).join().unwrap();
        assert_eq!(thread_cache_owners(), before);

        let b = TokenInterner::new();
        b.intern_cached("y");
        assert_eq!(thread_cache_owners(), before);
        assert_eq!(b.thread_cache_len(), 1);
    }
}
