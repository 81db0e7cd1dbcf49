//! Integration tests for the store layer.
//!
//! Tests marked `#[ignore]` need a Redis server at `TETHER_REDIS_URL`
//! (default `redis://localhost:6379`):
//!
//! ```text
//! cargo test -p tether-store -- --ignored
//! ```

use futures::TryStreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tether_store::prelude::*;

fn unique(prefix: &str) -> String {
    format!("{}:{}", prefix, rand::random::<u32>())
}

async fn client() -> StoreClient {
    let config = StoreConfig::from_env().pool_size(4).scan_count(5).build();
    StoreClient::new(config)
        .await
        .expect("Redis must be reachable at TETHER_REDIS_URL")
}

// =============================================================================
// Property caches and scans over the in-memory store
// =============================================================================

#[tokio::test]
async fn test_properties_share_one_store() {
    let store = Arc::new(MemoryStore::new());
    let location = RemoteLocation::hash_field("user:1", "name").unwrap();

    let writer: PropertyCache<String> =
        PropertyCache::new(store.clone(), location.clone(), Arc::new(StringConverter));
    writer.store(Some("alice".to_string())).await;

    // A second node sees the write
    let reader: PropertyCache<String> =
        PropertyCache::new(store.clone(), location, Arc::new(StringConverter));
    assert_eq!(reader.get().await.as_deref(), Some("alice"));
    assert_eq!(store.hget("user:1", "name").await.unwrap().as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_scan_sees_property_writes() {
    let store = Arc::new(MemoryStore::new().with_page_size(3));
    for i in 0..20 {
        let location = RemoteLocation::key(format!("counter:{}", i)).unwrap();
        PropertyCache::<i32>::new(store.clone(), location, Arc::new(IntegerConverter))
            .store(Some(i))
            .await;
    }
    store.set("other:1", "x").await.unwrap();

    let scanner: Arc<dyn KeyScanner> = store.clone();
    let keys: Vec<String> = KeyScan::start(scanner, "counter:*")
        .await
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(keys.len(), 20);
    assert!(keys.iter().all(|k| k.starts_with("counter:")));
}

// =============================================================================
// Redis
// =============================================================================

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_health_and_pool() {
    let client = client().await;
    client.health_check().await.unwrap();
    assert!(client.pool_stats().connections >= 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_hash_operations() {
    let client = client().await;
    let key = unique("tether:test:hash");

    client.hset(&key, "a", "1").await.unwrap();
    client.hset(&key, "b", "2").await.unwrap();

    assert_eq!(
        client.hmget(&key, &["a", "missing", "b"]).await.unwrap(),
        vec![Some("1".to_string()), None, Some("2".to_string())]
    );
    let mut names = client.hkeys(&key).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);

    assert!(client.hdel(&key, "a").await.unwrap());
    assert!(!client.hdel(&key, "a").await.unwrap());
    assert!(client.del(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_atomic_batch() {
    let client = client().await;
    let from = unique("tether:test:from");
    let to = unique("tether:test:to");

    client.set(&from, "v").await.unwrap();
    client
        .apply_atomic(vec![
            WriteOp::HSet {
                key: to.clone() + ":meta",
                field: "f".to_string(),
                value: "1".to_string(),
            },
            WriteOp::Rename {
                from: from.clone(),
                to: to.clone(),
            },
        ])
        .await
        .unwrap();

    assert!(!client.exists(&from).await.unwrap());
    assert_eq!(client.get(&to).await.unwrap().as_deref(), Some("v"));

    client.del(&to).await.unwrap();
    client.del(&(to + ":meta")).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_parallel_scan() {
    let client = Arc::new(client().await);
    let prefix = unique("tether:test:scan");
    for i in 0..50 {
        client.set(&format!("{}:{}", prefix, i), "x").await.unwrap();
    }

    let scanner: Arc<dyn KeyScanner> = client.clone();
    let keys = KeyScan::start(scanner, format!("{}:*", prefix))
        .await
        .unwrap()
        .collect_parallel(4)
        .await
        .unwrap();

    // SCAN may return a key more than once
    let distinct: BTreeSet<String> = keys.into_iter().collect();
    assert_eq!(distinct.len(), 50);

    for key in distinct {
        client.del(&key).await.unwrap();
    }
}
