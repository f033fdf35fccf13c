//! Session store tests
//!
//! Behaviour of the in-memory backend through the `SessionStore` trait object,
//! the way the engine and the collector use it.

use std::sync::Arc;
use std::time::Duration;

use caliban::config::StorageConfig;
use caliban::errors::CalibanError;
use caliban::storage::{MemorySessionStore, SessionStore, StorageFactory, storage_key};

fn store() -> Arc<dyn SessionStore> {
    Arc::new(MemorySessionStore::new(1_000))
}

#[tokio::test]
async fn test_contexts_are_isolated() {
    let store = store();
    store.save("abc", "cbn", r#"{"id":"abc"}"#, Some(60)).await.unwrap();
    store
        .save("abc", "__debug__cbn", r#"{"_id":"abc"}"#, Some(60))
        .await
        .unwrap();

    assert_eq!(
        store.load("abc", "cbn").await.unwrap().as_deref(),
        Some(r#"{"id":"abc"}"#)
    );
    assert_eq!(
        store.load("abc", "__debug__cbn").await.unwrap().as_deref(),
        Some(r#"{"_id":"abc"}"#)
    );
    assert_eq!(store.load("abd", "cbn").await.unwrap(), None);
}

#[tokio::test]
async fn test_save_overwrites_and_refreshes_ttl() {
    let store = store();
    store.save("s", "cbn", "v1", Some(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    store.save("s", "cbn", "v2", Some(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // 第二次写入刷新了过期时间
    assert_eq!(store.load("s", "cbn").await.unwrap().as_deref(), Some("v2"));

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(store.load("s", "cbn").await.unwrap(), None);
}

#[tokio::test]
async fn test_no_ttl_survives() {
    let store = store();
    store.save("forever", "cbn", "{}", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.load("forever", "cbn").await.unwrap().is_some());
}

#[tokio::test]
async fn test_zero_ttl_is_validation_error() {
    let store = store();
    let err = store.save("s", "cbn", "{}", Some(0)).await.unwrap_err();
    assert!(matches!(err, CalibanError::Validation(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_factory_default_backend() {
    let store = StorageFactory::create(&StorageConfig::default()).await.unwrap();
    assert_eq!(store.backend_name(), "memory");
    store.save("x", "cbn", "{}", Some(10)).await.unwrap();
    assert!(store.load("x", "cbn").await.unwrap().is_some());
}

#[test]
fn test_composite_key_layout() {
    assert_eq!(storage_key("cbn", "0123abcd"), "cbn.0123abcd");
}
