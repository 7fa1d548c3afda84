//! Schema versioning and full cache invalidation.

#![allow(missing_docs)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{ids, FixtureProvider};
use umbra::cache::{CacheOptions, CachedProvider};
use umbra::cancel::CancellationToken;
use umbra::kv::{KvStore, MemoryStore, Table, WriteBatch};
use umbra::provider::DataProvider;
use umbra::types::Result;

#[tokio::test]
async fn reopening_the_same_store_keeps_the_cache() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();

    {
        let provider = FixtureProvider::new().with_elements(&["a"]);
        let cache =
            CachedProvider::open(provider, CacheOptions::new(Arc::clone(&store) as Arc<dyn KvStore>))
                .await?;
        cache.elements(&ids(&["a"]), &cancel).await?;
    }

    let provider = FixtureProvider::new().with_elements(&["a"]);
    let spy = Arc::clone(&provider.spy);
    let cache =
        CachedProvider::open(provider, CacheOptions::new(Arc::clone(&store) as Arc<dyn KvStore>))
            .await?;
    let found = cache.elements(&ids(&["a"]), &cancel).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(
        spy.element_calls.load(Ordering::SeqCst),
        0,
        "matching schema version must not clear"
    );
    Ok(())
}

#[tokio::test]
async fn version_mismatch_drops_every_table() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();

    {
        let provider = FixtureProvider::new().with_elements(&["a"]);
        let cache =
            CachedProvider::open(provider, CacheOptions::new(Arc::clone(&store) as Arc<dyn KvStore>))
                .await?;
        cache.elements(&ids(&["a"]), &cancel).await?;
    }

    // Simulate a store written by a different layout.
    let mut batch = WriteBatch::new();
    batch.put(Table::Meta, b"schema_version".to_vec(), 999u32.to_be_bytes().to_vec());
    store.commit(batch).await.unwrap();

    let provider = FixtureProvider::new().with_elements(&["a"]);
    let spy = Arc::clone(&provider.spy);
    let cache =
        CachedProvider::open(provider, CacheOptions::new(Arc::clone(&store) as Arc<dyn KvStore>))
            .await?;
    cache.elements(&ids(&["a"]), &cancel).await?;
    assert_eq!(
        spy.element_calls.load(Ordering::SeqCst),
        1,
        "mismatch invalidates the whole cache"
    );
    Ok(())
}

#[tokio::test]
async fn clear_cache_forces_refetch_everywhere() -> Result<()> {
    let provider = FixtureProvider::new()
        .with_elements(&["a", "b"])
        .with_link("knows", "a", "b");
    let spy = Arc::clone(&provider.spy);
    let store = Arc::new(MemoryStore::new());
    let cache =
        CachedProvider::open(provider, CacheOptions::new(store)).await?;
    let cancel = CancellationToken::new();

    cache.elements(&ids(&["a"]), &cancel).await?;
    cache.links(&ids(&["a"]), &ids(&["b"]), &cancel).await?;
    let element_calls = spy.element_calls.load(Ordering::SeqCst);
    let link_calls = spy.link_call_count();

    cache.clear_cache().await?;

    cache.elements(&ids(&["a"]), &cancel).await?;
    cache.links(&ids(&["a"]), &ids(&["b"]), &cancel).await?;
    assert_eq!(spy.element_calls.load(Ordering::SeqCst), element_calls + 1);
    assert!(spy.link_call_count() > link_calls);
    Ok(())
}

#[tokio::test]
async fn clear_cache_is_safe_alongside_readers() -> Result<()> {
    let provider = FixtureProvider::new().with_elements(&["a", "b", "c"]);
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(CachedProvider::open(provider, CacheOptions::new(store)).await?);

    let mut handles = Vec::new();
    for round in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            if round % 2 == 0 {
                cache.clear_cache().await.map(|_| 3)
            } else {
                cache
                    .elements(&ids(&["a", "b", "c"]), &cancel)
                    .await
                    .map(|found| found.len())
            }
        }));
    }
    for handle in handles {
        // Operations either complete against the old contents or the fresh
        // store; none may fail or observe partial data.
        let len = handle.await.expect("task panicked")?;
        assert_eq!(len, 3);
    }
    Ok(())
}
