//! End-to-end tests for cached property values: coherence, round trips,
//! dirty tracking and sync failures.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use scenecache::{
    CacheConfig, MemoryStore, NodePath, SceneCache, SyncReport, TokenGroup, TokenInterner,
    TypeRegistry, Value,
};

fn scene() -> SceneCache<MemoryStore> {
    let registry = Arc::new(TypeRegistry::new(Arc::new(TokenInterner::new())));
    SceneCache::open_memory(registry, CacheConfig::default()).unwrap()
}

fn enemy(scene: &SceneCache<MemoryStore>, name: &str) -> NodePath {
    let node = NodePath::new(format!("/World/{name}")).unwrap();
    let store = scene.store();
    store.define_node(&node, Some("Enemy"));
    store.define_property(&node, "game:health:current", 100.0).unwrap();
    store.define_property(&node, "game:health:max", 100.0).unwrap();
    store.define_property(&node, "game:ai:state", "idle").unwrap();
    store.define_property(&node, "game:kills", 0i64).unwrap();
    store.define_property(&node, "xform:position", [0.0f64, 1.0, 2.0]).unwrap();
    node
}

// ============================================================================
// 1. Coherence
// ============================================================================

#[test]
fn test_get_after_set_returns_set_value() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");
    let state = scene.intern("game:ai:state");

    scene.set(&node, &hp, 42.5);
    scene.set(&node, &state, "chase".to_string());
    assert_eq!(scene.get::<f64>(&node, &hp), Some(42.5));
    assert_eq!(scene.get::<String>(&node, &state).as_deref(), Some("chase"));
    // Nothing reached the store yet.
    assert_eq!(scene.store().value(&node, "game:health:current"), Some(Value::Float(100.0)));
}

#[test]
fn test_external_edit_invisible_until_load() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let kills = scene.intern("game:kills");
    assert_eq!(scene.get::<i64>(&node, &kills), Some(0));

    scene.store().write_value(&node, "game:kills", 3i64).unwrap();
    assert_eq!(scene.get::<i64>(&node, &kills), Some(0));
    assert!(scene.load(&node, &kills));
    assert_eq!(scene.get::<i64>(&node, &kills), Some(3));
}

// ============================================================================
// 2. Round trip
// ============================================================================

#[test]
fn test_set_sync_load_round_trip() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");
    let kills = scene.intern("game:kills");
    let pos = scene.intern("xform:position");

    scene.set(&node, &hp, 0.1 + 0.2);
    scene.set(&node, &kills, 7i64);
    scene.set(&node, &pos, [3.0f64, 4.0, 5.0]);
    for token in [&hp, &kills, &pos] {
        assert!(scene.sync(&node, token));
        assert!(scene.load(&node, token));
    }

    let hp_value = scene.get::<f64>(&node, &hp).unwrap();
    assert!((hp_value - 0.3).abs() < 1e-9);
    assert_eq!(scene.get::<i64>(&node, &kills), Some(7));
    assert_eq!(scene.get::<[f64; 3]>(&node, &pos), Some([3.0, 4.0, 5.0]));
}

#[test]
fn test_f32_round_trip_within_epsilon() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");
    let written = 0.1f32 + 0.2f32;

    assert!(scene.set(&node, &hp, written));
    assert!(scene.sync(&node, &hp));
    assert_eq!(scene.store().write_count(), 1);

    // Re-read from the store through a fresh entry.
    assert!(scene.invalidate(&node));
    let read = scene.get::<f32>(&node, &hp).unwrap();
    assert!((read - 0.3f32).abs() < f32::EPSILON);
    assert!((read - written).abs() < f32::EPSILON);

    // Writing back what was read is not a change.
    assert!(!scene.set(&node, &hp, read));
    assert!(scene.sync(&node, &hp));
    assert_eq!(scene.store().write_count(), 1);
}

// ============================================================================
// 3. Dirty tracking
// ============================================================================

#[test]
fn test_dirty_only_after_differing_set() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");

    assert_eq!(scene.get::<f64>(&node, &hp), Some(100.0));
    assert!(!scene.is_dirty(&node, &hp));
    assert!(!scene.set(&node, &hp, 100.0));
    assert!(!scene.is_dirty(&node, &hp));
    assert!(scene.set(&node, &hp, 90.0));
    assert!(scene.is_dirty(&node, &hp));
    assert!(scene.sync(&node, &hp));
    assert!(!scene.is_dirty(&node, &hp));

    scene.set(&node, &hp, 80.0);
    assert!(scene.load(&node, &hp));
    assert!(!scene.is_dirty(&node, &hp));
    assert_eq!(scene.get::<f64>(&node, &hp), Some(90.0));
}

#[test]
fn test_redundant_writes_never_reach_store() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");
    for _ in 0..10 {
        scene.set(&node, &hp, 100.0);
        scene.sync(&node, &hp);
    }
    assert_eq!(scene.store().write_count(), 0);
    assert_eq!(scene.stats().suppressed_writes, 10);
}

#[test]
fn test_sync_all_and_node_reports() {
    let scene = scene();
    let a = enemy(&scene, "A");
    let b = enemy(&scene, "B");
    let hp = scene.intern("game:health:current");
    let kills = scene.intern("game:kills");

    scene.set(&a, &hp, 1.0);
    scene.set(&a, &kills, 1i64);
    scene.set(&b, &hp, 2.0);
    assert_eq!(scene.dirty_count(), 3);
    assert_eq!(scene.sync_node(&b), SyncReport { synced: 1, failed: 0 });
    assert_eq!(scene.sync_all(), SyncReport { synced: 2, failed: 0 });
    assert_eq!(scene.dirty_count(), 0);
    assert_eq!(scene.store().write_count(), 3);
}

// ============================================================================
// 4. Sync failures
// ============================================================================

#[test]
fn test_read_only_property_stays_dirty_until_writable() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let max = scene.intern("game:health:max");
    scene.store().set_read_only(&node, "game:health:max", true).unwrap();

    scene.set(&node, &max, 150.0);
    assert!(!scene.sync(&node, &max));
    assert!(scene.is_dirty(&node, &max));
    assert_eq!(scene.sync_all(), SyncReport { synced: 0, failed: 1 });

    scene.store().set_read_only(&node, "game:health:max", false).unwrap();
    assert!(scene.sync(&node, &max));
    assert_eq!(scene.store().value(&node, "game:health:max"), Some(Value::Float(150.0)));
}

#[test]
fn test_wrong_kind_write_is_rejected_by_store() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let kills = scene.intern("game:kills");
    scene.set(&node, &kills, 2.5);
    assert!(!scene.sync(&node, &kills));
    assert_eq!(scene.store().rejected_write_count(), 1);
}

#[test]
fn test_missing_property_falls_back_to_default() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let mana = scene.intern("game:mana");
    assert_eq!(scene.get::<f64>(&node, &mana), None);
    assert_eq!(scene.get_or(&node, &mana, 50.0), 50.0);
    assert!(!scene.load(&node, &mana));
}

#[test]
fn test_property_removed_from_store_after_caching() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let hp = scene.intern("game:health:current");
    scene.get::<f64>(&node, &hp);
    scene.store().remove_property(&node, "game:health:current").unwrap();
    assert!(!scene.load(&node, &hp));
    scene.invalidate(&node);
    assert_eq!(scene.get_or(&node, &hp, -1.0), -1.0);
}

// ============================================================================
// 5. Handles
// ============================================================================

#[test]
fn test_pre_cache_group_then_read() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    let group = TokenGroup::new(scene.interner(), "Health", [
        ("current", "game:health:current"),
        ("max", "game:health:max"),
    ]);
    assert_eq!(scene.pre_cache_group(&node, &group), 2);
    let before = scene.stats().handles;

    let current = group.get("current").unwrap();
    assert_eq!(scene.get::<f64>(&node, current), Some(100.0));
    let after = scene.stats().handles;
    assert_eq!(after.misses, before.misses);
    assert_eq!(after.hits, before.hits + 1);
}

#[test]
fn test_warm_namespace() {
    let scene = scene();
    let node = enemy(&scene, "Carrot");
    assert_eq!(scene.warm_namespace(&node, "game"), 4);
    assert_eq!(scene.properties().namespace_handles(&node, "game").len(), 4);
    assert_eq!(scene.warm_namespace(&node, "xform"), 1);
    assert!(scene.get_handle(&node, &scene.intern("xform:position")).is_some());
}
