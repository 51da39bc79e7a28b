#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use tokio::time;

    use crate::config::{LocalStoreConfig, PatternRemoval};
    use crate::error::{CacheError, StorageError};
    use crate::storage::{CacheStore, MemoryStore};

    use super::super::common;

    fn create_test_memory() -> MemoryStore {
        MemoryStore::new(LocalStoreConfig {
            max_entries: 1000,
            use_background_task: true,
            cleanup_interval: Duration::from_secs(1),
            pattern_removal: PatternRemoval::Scan,
        })
    }

    #[tokio::test]
    async fn test_memory_basic_operations() {
        let memory = create_test_memory();
        let result = common::test_basic_operations(&memory).await;
        assert!(result.is_ok(), "Basic memory operations failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_memory_key_expiration() {
        let memory = create_test_memory();
        let result = common::test_key_expiration(&memory).await;
        assert!(result.is_ok(), "Memory key expiration failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_memory_pattern_removal() {
        let memory = create_test_memory();
        let result = common::test_pattern_removal(&memory).await;
        assert!(result.is_ok(), "Memory pattern removal failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_memory_get_many_and_clear() {
        let memory = create_test_memory();
        assert!(common::test_get_many(&memory).await.is_ok());
        assert!(common::test_clear(&memory).await.is_ok());
        assert!(memory.is_empty());
    }

    // Without a runtime the sweeper is skipped but lazy expiry still works
    #[test]
    fn test_memory_without_runtime() {
        let memory = MemoryStore::default();

        memory
            .insert("plain", b"value", Duration::from_millis(20))
            .unwrap();
        assert_eq!(memory.lookup("plain"), Some(b"value".to_vec()));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(memory.lookup("plain"), None);
        assert_eq!(memory.len(), 0, "expired entry is removed on access");
    }

    #[test]
    fn test_unrepresentable_ttl_does_not_panic() {
        let memory = MemoryStore::default();

        memory.insert("forever", b"1", Duration::MAX).unwrap();
        assert_eq!(memory.lookup("forever"), Some(b"1".to_vec()));

        assert_eq!(memory.add("counter", 5, Some(Duration::MAX)).unwrap(), 5);
        assert_eq!(memory.add("counter", 1, Some(Duration::MAX)).unwrap(), 6);
    }

    #[test]
    fn test_store_built_outside_runtime_serves_async_calls() {
        let memory = MemoryStore::default();

        tokio_test::block_on(async {
            memory.set("visits", b"1", Duration::from_secs(5)).await.unwrap();
            assert_eq!(memory.increment("visits", 2, None).await.unwrap(), 3);
            assert!(memory.exists("visits").await.unwrap());
            assert_eq!(memory.get("visits").await.unwrap(), Some(b"3".to_vec()));
        });
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let memory = MemoryStore::new(LocalStoreConfig {
            max_entries: 100,
            use_background_task: true,
            cleanup_interval: Duration::from_millis(50),
            pattern_removal: PatternRemoval::Scan,
        });

        for i in 0..10 {
            memory
                .insert(&format!("sweep:{}", i), b"x", Duration::from_millis(20))
                .unwrap();
        }
        assert_eq!(memory.len(), 10);

        // Never read again; only the sweeper can drop them
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(memory.len(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let memory = MemoryStore::new(LocalStoreConfig {
            max_entries: 2,
            use_background_task: false,
            cleanup_interval: Duration::from_secs(60),
            pattern_removal: PatternRemoval::Scan,
        });

        memory.set("a", b"1", Duration::from_secs(60)).await.unwrap();
        memory.set("b", b"2", Duration::from_secs(60)).await.unwrap();

        let result = memory.set("c", b"3", Duration::from_secs(60)).await;
        assert!(matches!(
            result,
            Err(CacheError::Storage(StorageError::Capacity(_)))
        ));

        // Overwriting an existing key is always allowed
        memory.set("a", b"10", Duration::from_secs(60)).await.unwrap();
        assert_eq!(memory.lookup("a"), Some(b"10".to_vec()));
    }

    #[tokio::test]
    async fn test_capacity_reclaims_expired_entries() {
        let memory = MemoryStore::new(LocalStoreConfig {
            max_entries: 2,
            use_background_task: false,
            cleanup_interval: Duration::from_secs(60),
            pattern_removal: PatternRemoval::Scan,
        });

        memory.set("short", b"1", Duration::from_millis(10)).await.unwrap();
        memory.set("long", b"2", Duration::from_secs(60)).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;

        memory.set("new", b"3", Duration::from_secs(60)).await.unwrap();
        assert!(memory.contains("new"));
        assert!(memory.contains("long"));
        assert!(!memory.contains("short"));
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let memory = create_test_memory();
        memory
            .set("text", b"\"hello\"", Duration::from_secs(60))
            .await
            .unwrap();

        let result = memory.increment("text", 1, None).await;
        assert!(matches!(
            result,
            Err(CacheError::Storage(StorageError::Command(_)))
        ));

        memory.set("big", i64::MAX.to_string().as_bytes(), Duration::from_secs(60)).await.unwrap();
        assert!(memory.increment("big", 1, None).await.is_err());
    }

    #[tokio::test]
    async fn test_increment_keeps_existing_expiry() {
        let memory = create_test_memory();
        memory
            .set("hits", b"5", Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(memory.increment("hits", 1, None).await.unwrap(), 6);

        time::sleep(Duration::from_millis(150)).await;
        assert!(!memory.contains("hits"), "increment without a TTL keeps the old expiry");
    }

    // The local tier can either scan (default) or ignore pattern removal; with the latter,
    // matching entries stay visible locally until their TTL runs out.
    #[tokio::test]
    async fn test_unsupported_pattern_removal_leaves_entries() {
        let memory = MemoryStore::new(LocalStoreConfig {
            pattern_removal: PatternRemoval::Unsupported,
            use_background_task: false,
            ..LocalStoreConfig::default()
        });

        memory.set("orders:1", b"1", Duration::from_secs(60)).await.unwrap();

        let removed = memory.remove_by_pattern("orders:*").await.unwrap();
        assert_eq!(removed, 0);
        assert!(memory.contains("orders:1"), "stale entry survives until its TTL");
    }

    #[tokio::test]
    async fn test_keys_matching_skips_expired() {
        let memory = create_test_memory();
        memory.set("user:1", b"a", Duration::from_secs(60)).await.unwrap();
        memory.set("user:2", b"b", Duration::from_millis(10)).await.unwrap();
        memory.set("team:1", b"c", Duration::from_secs(60)).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;

        assert_eq!(memory.keys_matching("user:*"), vec!["user:1".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let memory = Arc::new(create_test_memory());
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let memory = Arc::clone(&memory);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    for j in 0..20 {
                        memory
                            .set(&format!("worker:{}:{}", i, j), b"v", Duration::from_secs(60))
                            .await
                            .unwrap();
                        memory.increment("shared_counter", 1, None).await.unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(memory.increment("shared_counter", 0, None).await.unwrap(), 200);
        assert_eq!(memory.keys_matching("worker:*").len(), 200);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let memory = create_test_memory();
        let clone = memory.clone();

        memory.set("shared", b"yes", Duration::from_secs(60)).await.unwrap();
        assert_eq!(clone.get("shared").await.unwrap(), Some(b"yes".to_vec()));
    }
}
