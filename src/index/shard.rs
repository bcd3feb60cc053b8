//! Sharded inverted-index tables.
//!
//! Each table is split into N independently locked sub-tables, selected by
//! key hash, so a writer growing one shard never blocks readers of the
//! others. Readers copy results out; no reference into a shard outlives
//! its lock guard.

use std::hash::{BuildHasher, Hash};

use hashbrown::DefaultHashBuilder;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::model::NodePath;

/// Set of nodes stored under one index key.
pub type NodeSet = HashSet<NodePath>;

/// Source nodes pointing at one target, grouped by relationship name.
pub type RelationshipSources = HashMap<String, NodeSet>;

/// Value stored under an index key. Keys whose bucket becomes empty are
/// removed from the table.
pub(crate) trait Bucket: Default {
    fn is_empty(&self) -> bool;
}

impl Bucket for NodeSet {
    fn is_empty(&self) -> bool {
        HashSet::is_empty(self)
    }
}

impl Bucket for RelationshipSources {
    fn is_empty(&self) -> bool {
        HashMap::is_empty(self)
    }
}

pub(crate) struct ShardedTable<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: DefaultHashBuilder,
}

impl<K: Hash + Eq + Clone, V: Bucket> ShardedTable<K, V> {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: DefaultHashBuilder::default(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Mutate the bucket for `key`, creating it if needed and dropping it if
    /// the mutation leaves it empty.
    pub fn update(&self, key: &K, f: impl FnOnce(&mut V)) {
        let mut shard = self.shard(key).write();
        let bucket = shard.entry(key.clone()).or_default();
        f(bucket);
        if bucket.is_empty() {
            shard.remove(key);
        }
    }

    /// Mutate an existing bucket only; absent keys are left absent.
    pub fn update_existing(&self, key: &K, f: impl FnOnce(&mut V)) {
        let mut shard = self.shard(key).write();
        if let Some(bucket) = shard.get_mut(key) {
            f(bucket);
            if bucket.is_empty() {
                shard.remove(key);
            }
        }
    }

    pub fn read<R>(&self, key: &K, f: impl FnOnce(Option<&V>) -> R) -> R {
        f(self.shard(key).read().get(key))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.shards.iter().flat_map(|s| s.read().keys().cloned().collect::<Vec<_>>()).collect()
    }

    /// Visit every (key, bucket) pair, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in self.shards.iter() {
            for (k, v) in shard.read().iter() {
                f(k, v);
            }
        }
    }

    pub fn key_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}

impl<K: Hash + Eq + Clone> ShardedTable<K, NodeSet> {
    pub fn insert(&self, key: &K, node: &NodePath) {
        self.update(key, |set| {
            set.insert(node.clone());
        });
    }

    pub fn remove(&self, key: &K, node: &NodePath) {
        self.update_existing(key, |set| {
            set.remove(node);
        });
    }

    pub fn get(&self, key: &K) -> NodeSet {
        self.read(key, |set| set.cloned().unwrap_or_default())
    }

    pub fn count(&self, key: &K) -> usize {
        self.read(key, |set| set.map_or(0, |s| s.len()))
    }
}
