use super::{MemoryStore, SledStore, Store, StoreDrivers, StoreError, open_store};
use crate::broker::message::{Message, PublishType};
use crate::config::StoreSettings;

use std::sync::Arc;
use tempfile::tempdir;

fn create_test_sled() -> (SledStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();
    (store, dir)
}

/// Same sequence for every backend: save two, front, pop, front, delete.
fn exercise_store(store: &dyn Store) {
    let queue = "test_store";
    let routing_key = "abc";

    let id1 = store.generate_id().unwrap();
    let id2 = store.generate_id().unwrap();
    assert!(id2 > id1);

    let m1 = Message::new(id1, PublishType::Fanout, routing_key, "1");
    let m2 = Message::new(id2, PublishType::Direct, routing_key, "2");

    store.save(queue, routing_key, &m1).unwrap();
    store.save(queue, routing_key, &m2).unwrap();
    assert_eq!(store.len(queue, routing_key).unwrap(), 2);
    assert_eq!(store.front(queue, routing_key).unwrap(), Some(m1));
    assert_eq!(store.back(queue, routing_key).unwrap(), Some(m2.clone()));

    store.pop(queue, routing_key).unwrap();
    assert_eq!(store.len(queue, routing_key).unwrap(), 1);
    assert_eq!(store.front(queue, routing_key).unwrap(), Some(m2.clone()));

    store.delete(queue, routing_key, m2.id).unwrap();
    assert!(store.is_empty(queue, routing_key).unwrap());
    assert_eq!(store.front(queue, routing_key).unwrap(), None);
    assert_eq!(store.back(queue, routing_key).unwrap(), None);

    // deleting twice and popping an empty backlog are no-ops
    store.delete(queue, routing_key, m2.id).unwrap();
    store.pop(queue, routing_key).unwrap();
}

#[test]
fn test_memory_store() {
    exercise_store(&MemoryStore::new());
}

#[test]
fn test_sled_store() {
    let (store, _dir) = create_test_sled();
    exercise_store(&store);
}

/// Publishers racing on one route may save out of id order; the head is
/// still the lowest id.
fn exercise_id_order(store: &dyn Store) {
    let older = store.generate_id().unwrap();
    let newer = store.generate_id().unwrap();

    store
        .save("q", "k", &Message::new(newer, PublishType::Direct, "k", "newer"))
        .unwrap();
    store
        .save("q", "k", &Message::new(older, PublishType::Direct, "k", "older"))
        .unwrap();

    assert_eq!(store.front("q", "k").unwrap().unwrap().id, older);
    assert_eq!(store.back("q", "k").unwrap().unwrap().id, newer);
    store.pop("q", "k").unwrap();
    assert_eq!(store.front("q", "k").unwrap().unwrap().id, newer);
}

#[test]
fn test_memory_store_orders_by_id() {
    exercise_id_order(&MemoryStore::new());
}

#[test]
fn test_sled_store_orders_by_id() {
    let (store, _dir) = create_test_sled();
    exercise_id_order(&store);
}

#[test]
fn test_routes_are_independent() {
    let store = MemoryStore::new();
    let id = store.generate_id().unwrap();
    store
        .save("q", "a", &Message::new(id, PublishType::Direct, "a", "x"))
        .unwrap();

    assert_eq!(store.len("q", "a").unwrap(), 1);
    assert_eq!(store.len("q", "b").unwrap(), 0);
    assert_eq!(store.len("other", "a").unwrap(), 0);
}

#[test]
fn test_sled_tree_names_do_not_collide() {
    let (store, _dir) = create_test_sled();
    let id = store.generate_id().unwrap();
    store
        .save("a:b", "c", &Message::new(id, PublishType::Direct, "c", "x"))
        .unwrap();

    assert_eq!(store.len("a", "b:c").unwrap(), 0);
    assert_eq!(store.len("a:b", "c").unwrap(), 1);
}

#[test]
fn test_sled_front_is_oldest_by_id() {
    let (store, _dir) = create_test_sled();
    let ids: Vec<_> = (0..300).map(|_| store.generate_id().unwrap()).collect();
    for id in &ids {
        store
            .save("q", "k", &Message::new(*id, PublishType::Direct, "k", "x"))
            .unwrap();
    }

    assert_eq!(store.front("q", "k").unwrap().unwrap().id, ids[0]);
    store.pop("q", "k").unwrap();
    assert_eq!(store.front("q", "k").unwrap().unwrap().id, ids[1]);
}

#[test]
fn test_sled_ids_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    let first = {
        let store = SledStore::open(path).unwrap();
        let id = store.generate_id().unwrap();
        store
            .save("q", "k", &Message::new(id, PublishType::Direct, "k", "kept"))
            .unwrap();
        store.flush().unwrap();
        id
    };

    let store = SledStore::open(path).unwrap();
    assert!(store.generate_id().unwrap() > first);
    assert_eq!(store.front("q", "k").unwrap().unwrap().body, "kept");
}

#[test]
fn test_open_store_by_name() {
    let settings = StoreSettings {
        driver: "memory".to_string(),
        path: String::new(),
    };
    let store = open_store(&settings).unwrap();
    assert_eq!(store.generate_id().unwrap(), 1);

    let unknown = StoreSettings {
        driver: "redis".to_string(),
        path: String::new(),
    };
    assert!(matches!(
        open_store(&unknown),
        Err(StoreError::UnknownDriver(name)) if name == "redis"
    ));
}

#[test]
fn test_register_custom_driver() {
    let mut drivers = StoreDrivers::empty();
    drivers
        .register("scratch", |_| Ok(Arc::new(MemoryStore::new()) as Arc<dyn Store>))
        .unwrap();
    assert!(matches!(
        drivers.register("scratch", |_| Ok(Arc::new(MemoryStore::new()) as Arc<dyn Store>)),
        Err(StoreError::DuplicateDriver(_))
    ));

    let settings = StoreSettings {
        driver: "scratch".to_string(),
        path: String::new(),
    };
    assert!(drivers.open(&settings).is_ok());
}
