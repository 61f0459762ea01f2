//! Integration tests for cache-mux
//!
//! These tests verify end-to-end cache behavior across stores and the registry.

use cache_mux::backend::{FileBackend, FileConfig, MemoryBackend, MemoryConfig};
use cache_mux::{CacheBackend, Codec, Error, Registry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: String,
    name: String,
    email: String,
}

fn alice() -> User {
    User {
        id: "user_001".to_string(),
        name: "Alice".to_string(),
        email: "alice@example.com".to_string(),
    }
}

fn memory() -> MemoryBackend {
    MemoryBackend::with_config(MemoryConfig::default().with_sweep_interval(Duration::ZERO))
}

async fn file_store(dir: &TempDir) -> FileBackend {
    FileBackend::new(FileConfig::new(dir.path()))
        .await
        .expect("Failed to open file store")
}

/// Runs the shared store contract against any backend.
async fn exercise_contract<B: CacheBackend>(store: &B) {
    // set / get / has
    store
        .set("user:1", &alice(), Duration::from_secs(60))
        .await
        .expect("Failed to set");
    assert_eq!(store.get::<User>("user:1").await.unwrap(), alice());
    assert!(store.has("user:1").await.unwrap());

    // miss
    assert!(matches!(
        store.get::<User>("user:2").await,
        Err(Error::KeyNotFound(_))
    ));

    // multi-get alignment
    let results = store.get_multi::<User>(&["user:1", "user:2"]).await;
    assert_eq!(results.values()[0], Some(alice()));
    assert_eq!(results.values()[1], None);
    let message = results.error().expect("aggregate error").to_string();
    assert!(message.contains("key [user:2] error"));

    // counters
    store.set("count", &10i32, Duration::ZERO).await.unwrap();
    store.increment("count", 5).await.unwrap();
    store.decrement("count", 3).await.unwrap();
    assert_eq!(store.get::<i32>("count").await.unwrap(), 12);

    store.set("max", &i32::MAX, Duration::ZERO).await.unwrap();
    assert!(matches!(store.increment("max", 1).await, Err(Error::Overflow)));
    assert_eq!(store.get::<i32>("max").await.unwrap(), i32::MAX);

    store.set("floor", &0u64, Duration::ZERO).await.unwrap();
    assert!(matches!(
        store.decrement("floor", 1).await,
        Err(Error::Underflow)
    ));

    store.set("name", &alice(), Duration::ZERO).await.unwrap();
    assert!(matches!(
        store.increment("name", 1).await,
        Err(Error::NotIntegerType)
    ));

    // expiry
    store
        .set("short", &"brief".to_string(), Duration::from_millis(50))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!store.has("short").await.unwrap());
    assert!(matches!(
        store.get::<String>("short").await,
        Err(Error::KeyExpired(_))
    ));

    // delete and clear
    store.delete("user:1").await.unwrap();
    store.delete("user:1").await.unwrap();
    assert!(!store.has("user:1").await.unwrap());

    store.clear().await.unwrap();
    assert!(!store.has("count").await.unwrap());
    assert!(!store.has("name").await.unwrap());
}

#[tokio::test]
async fn test_memory_store_contract() {
    exercise_contract(&memory()).await;
}

#[tokio::test]
async fn test_file_store_contract() {
    let dir = TempDir::new().unwrap();
    exercise_contract(&file_store(&dir).await).await;
}

#[tokio::test]
async fn test_json_codec_contract() {
    let dir = TempDir::new().unwrap();
    let store = FileBackend::new(FileConfig::new(dir.path()).with_codec(Codec::Json))
        .await
        .unwrap();
    exercise_contract(&store).await;
    exercise_contract(&MemoryBackend::with_config(
        MemoryConfig::default().with_codec(Codec::Json),
    ))
    .await;
}

/// Mixed stores behind one registry, addressed by name.
#[tokio::test]
async fn test_registry_over_mixed_stores() {
    let dir = TempDir::new().unwrap();
    let registry: Registry = Registry::new()
        .extend(memory())
        .extend(file_store(&dir).await);

    assert_eq!(registry.names(), ["memory", "file"]);

    registry.set("k", &"in memory".to_string(), Duration::ZERO).await.unwrap();
    let disk = registry.disk("file");
    disk.set("k", &"on disk".to_string(), Duration::ZERO).await.unwrap();

    assert_eq!(registry.get::<String>("k").await.unwrap(), "in memory");
    assert_eq!(disk.get::<String>("k").await.unwrap(), "on disk");

    // clearing one store leaves the other alone
    disk.clear().await.unwrap();
    assert!(!disk.has("k").await.unwrap());
    assert!(registry.has("k").await.unwrap());
}

#[tokio::test]
async fn test_registry_unknown_store_is_fatal() {
    let registry: Registry = Registry::new().extend(memory());
    let err = registry
        .disk("redis")
        .get::<String>("k")
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "No such store: redis");
}

#[tokio::test]
async fn test_pull_consumes_value() {
    let registry: Registry = Registry::new().extend(memory());
    registry.set("job", &alice(), Duration::ZERO).await.unwrap();

    assert_eq!(registry.pull::<User>("job").await.unwrap(), alice());
    assert!(!registry.has("job").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pull_delivers_once() {
    let registry: Registry = Registry::new().extend(memory());
    registry.set("ticket", &7u32, Duration::ZERO).await.unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.pull::<u32>("ticket").await
        }));
    }

    let mut delivered = 0;
    for handle in handles {
        match handle.await.expect("Task failed") {
            Ok(value) => {
                assert_eq!(value, 7);
                delivered += 1;
            }
            Err(e) => assert!(e.is_miss()),
        }
    }
    assert_eq!(delivered, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_remember_on_file_store() {
    let dir = TempDir::new().unwrap();
    let registry: Registry = Registry::new().extend(file_store(&dir).await);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..6 {
        let registry = registry.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            registry
                .remember_with("profile", Duration::from_secs(60), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(alice())
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.expect("Task failed").unwrap(), alice());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remember_recomputes_after_expiry() {
    let registry: Registry = Registry::new().extend(memory());
    let calls = AtomicUsize::new(0);
    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        "fresh".to_string()
    };

    registry
        .remember("k", Duration::from_millis(40), compute)
        .await
        .unwrap();
    registry
        .remember("k", Duration::from_millis(40), compute)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    registry
        .remember("k", Duration::from_millis(40), compute)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_through_registry() {
    let registry: Registry = Registry::new().extend(memory());

    let mut handles = vec![];
    for _ in 0..20 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.increment("hits", 1).await
        }));
    }
    for handle in handles {
        handle.await.expect("Task failed").expect("Failed to increment");
    }

    // absent key started at zero as an i64
    assert_eq!(registry.get::<i64>("hits").await.unwrap(), 20);
}

#[tokio::test]
async fn test_sweep_reclaims_unread_items() {
    let store = MemoryBackend::with_config(
        MemoryConfig::default().with_sweep_interval(Duration::from_millis(25)),
    );
    for i in 0..50 {
        store
            .set(&format!("temp:{}", i), &i, Duration::from_millis(10))
            .await
            .unwrap();
    }
    store.set("keep", &true, Duration::ZERO).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.len().await, 1);
    assert!(store.get::<bool>("keep").await.unwrap());
    store.close().await;
}

/// Random counter workload checked against a plain map.
async fn exercise_random_counters<B: CacheBackend>(store: &B, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model: HashMap<String, i64> = HashMap::new();

    for _ in 0..500 {
        let key = format!("counter:{}", rng.random_range(0..8));
        match rng.random_range(0..4) {
            0 => {
                let value = rng.random_range(-1_000..1_000i64);
                store.set(&key, &value, Duration::ZERO).await.unwrap();
                model.insert(key, value);
            }
            1 => {
                store.delete(&key).await.unwrap();
                model.remove(&key);
            }
            2 => {
                let step = rng.random_range(-100..100i64);
                store.increment(&key, step).await.unwrap();
                *model.entry(key).or_insert(0) += step;
            }
            _ => {
                let step = rng.random_range(-100..100i64);
                store.decrement(&key, step).await.unwrap();
                *model.entry(key).or_insert(0) -= step;
            }
        }
    }

    for i in 0..8 {
        let key = format!("counter:{}", i);
        match model.get(&key) {
            Some(expected) => assert_eq!(store.get::<i64>(&key).await.unwrap(), *expected),
            None => assert!(!store.has(&key).await.unwrap()),
        }
    }
}

#[tokio::test]
async fn test_random_counter_workload() {
    exercise_random_counters(&memory(), 7).await;

    let dir = TempDir::new().unwrap();
    exercise_random_counters(&file_store(&dir).await, 11).await;
}
