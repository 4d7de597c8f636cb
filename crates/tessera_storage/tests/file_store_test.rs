//! Integration tests for the region file store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::{BlockIndex, ColumnIndex, Coordinate, Entity, EntityId, Planet, PlanetId, RegionKey};
use tessera_storage::{FileStore, FileStoreConfig};
use tessera_streaming::{EntityCache, EntityStore, StorageError, StreamingConfig};

fn temp_root(name: &str) -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tessera_{name}_{id}"))
}

fn open(root: &PathBuf) -> FileStore {
    FileStore::open(FileStoreConfig {
        root: root.clone(),
        sync_writes: false,
    })
    .unwrap()
}

fn at(x: i32, y: i32) -> Coordinate {
    Coordinate::at_block(PlanetId(5), BlockIndex::new(x, y, 40))
}

#[test]
fn test_missing_region_loads_empty() {
    let root = temp_root("missing");
    let store = open(&root);

    let loaded = store.load_entities(PlanetId(5), ColumnIndex::new(1, 2)).unwrap();
    assert!(loaded.is_empty());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_saved_region_loads_back() {
    let root = temp_root("roundtrip");
    let store = open(&root);
    let column = ColumnIndex::new(2, 3);

    let mut player = Entity::player(EntityId::from_raw(1), at(40, 50));
    if let Some(inventory) = player.inventory.as_mut() {
        inventory.add(17, 99);
    }
    let entities = vec![player, Entity::dog(EntityId::from_raw(2), at(33, 60))];

    store.save_entities(PlanetId(5), column, &entities).unwrap();
    assert!(store.region_path(PlanetId(5), column).exists());

    let loaded = store.load_entities(PlanetId(5), column).unwrap();
    assert_eq!(loaded, entities);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_repeated_save_is_idempotent() {
    let root = temp_root("idempotent");
    let store = open(&root);
    let column = ColumnIndex::new(0, 0);
    let entities = vec![Entity::prop(EntityId::from_raw(8), at(1, 1))];

    store.save_entities(PlanetId(5), column, &entities).unwrap();
    let path = store.region_path(PlanetId(5), column);
    let first = std::fs::read(&path).unwrap();
    store.save_entities(PlanetId(5), column, &entities).unwrap();
    let second = std::fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert!(!path.with_extension("ents.tmp").exists());

    store.save_entities(PlanetId(5), column, &[]).unwrap();
    assert!(store.load_entities(PlanetId(5), column).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_corrupt_file_is_reported() {
    let root = temp_root("corrupt");
    let store = open(&root);
    let column = ColumnIndex::new(4, 4);
    let path = store.region_path(PlanetId(5), column);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, [4, 0, 0, 0, 1, 2]).unwrap();

    let result = store.load_entities(PlanetId(5), column);
    assert!(matches!(result, Err(StorageError::Corrupt { .. })));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_file_for_other_region_is_corrupt() {
    let root = temp_root("misplaced");
    let store = open(&root);

    store
        .save_entities(PlanetId(5), ColumnIndex::new(1, 1), &[])
        .unwrap();
    let from = store.region_path(PlanetId(5), ColumnIndex::new(1, 1));
    let to = store.region_path(PlanetId(5), ColumnIndex::new(2, 2));
    std::fs::rename(from, to).unwrap();

    let result = store.load_entities(PlanetId(5), ColumnIndex::new(2, 2));
    assert!(matches!(result, Err(StorageError::Corrupt { .. })));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_config_from_toml() {
    let config = FileStoreConfig::from_toml_str("root = \"/srv/world\"\nsync_writes = true\n").unwrap();
    assert_eq!(config, FileStoreConfig::production("/srv/world"));

    let partial = FileStoreConfig::from_toml_str("sync_writes = true").unwrap();
    assert_eq!(partial.root, FileStoreConfig::default().root);

    assert!(FileStoreConfig::from_toml_str("sync_writes = 3").is_err());
}

#[test]
fn test_cache_persists_entities_across_restarts() {
    let root = temp_root("restart");
    let planet = Planet::new(PlanetId(5), ColumnIndex::new(16, 16)).unwrap();
    let center = ColumnIndex::new(3, 3);
    let dog = Entity::dog(EntityId::from_raw(77), at(3 * 16 + 5, 3 * 16 + 5));
    let config = StreamingConfig {
        soft_border: 0,
        ..StreamingConfig::test()
    };

    {
        let cache = EntityCache::with_config(Arc::new(open(&root)), config.clone()).unwrap();
        cache.subscribe(&planet, center, 0).unwrap();
        assert!(cache.wait_until_settled(Duration::from_secs(10)));
        assert!(cache.spawn_entity(&planet, dog.clone()).unwrap());
        cache.unsubscribe(&planet, center, 0).unwrap();
        assert!(cache.wait_until_settled(Duration::from_secs(10)));
        assert!(cache.is_empty());
    }

    let cache = EntityCache::with_config(Arc::new(open(&root)), config).unwrap();
    cache.subscribe(&planet, center, 0).unwrap();
    assert!(cache.wait_until_settled(Duration::from_secs(10)));
    assert_eq!(cache.entity(dog.id), Some(dog));
    assert_eq!(cache.entities_in(&RegionKey::new(PlanetId(5), center)).len(), 1);

    drop(cache);
    let _ = std::fs::remove_dir_all(&root);
}
