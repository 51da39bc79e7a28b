// src/storage/tests/mod.rs

mod memory_tests;

// Checks every CacheStore implementation must pass
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::CacheStore;

    const MINUTE: Duration = Duration::from_secs(60);

    pub async fn test_basic_operations<S: CacheStore>(store: &S) -> Result<()> {
        let key = "test_basic_key";
        let value: &[u8] = b"test_value";

        store.set(key, value, MINUTE).await?;
        assert_eq!(store.get(key).await?.as_deref(), Some(value));

        // Overwrite replaces the value
        store.set(key, b"second", MINUTE).await?;
        assert_eq!(store.get(key).await?.as_deref(), Some(&b"second"[..]));

        let counter_key = "test_counter";
        assert_eq!(store.increment(counter_key, 1, None).await?, 1);
        assert_eq!(store.increment(counter_key, 3, None).await?, 4);
        assert_eq!(store.increment(counter_key, -5, None).await?, -1);
        // Counters read back as decimal text
        assert_eq!(store.get(counter_key).await?.as_deref(), Some(&b"-1"[..]));

        assert!(store.exists(key).await?);
        assert!(store.exists(counter_key).await?);
        assert!(!store.exists("non_existent_key").await?);
        assert_eq!(store.get("non_existent_key").await?, None);

        assert!(store.delete(key).await?);
        assert!(!store.delete(key).await?);
        assert!(!store.exists(key).await?);

        store.delete(counter_key).await?;
        Ok(())
    }

    pub async fn test_key_expiration<S: CacheStore>(store: &S) -> Result<()> {
        let key = "test_expiry_key";

        store.set(key, b"expiring_value", Duration::from_millis(100)).await?;
        assert!(store.exists(key).await?);

        time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.get(key).await?, None);
        assert!(!store.exists(key).await?);

        // Increment with a TTL refreshes the expiry
        let counter_key = "test_expiring_counter";
        store.increment(counter_key, 1, Some(Duration::from_millis(100))).await?;
        assert!(store.exists(counter_key).await?);

        time::sleep(Duration::from_millis(150)).await;
        assert!(!store.exists(counter_key).await?);

        Ok(())
    }

    pub async fn test_pattern_removal<S: CacheStore>(store: &S) -> Result<()> {
        store.set("orders:1", b"1", MINUTE).await?;
        store.set("orders:2", b"2", MINUTE).await?;
        store.set("products:1", b"3", MINUTE).await?;

        let removed = store.remove_by_pattern("orders:*").await?;
        assert_eq!(removed, 2);

        assert!(!store.exists("orders:1").await?);
        assert!(!store.exists("orders:2").await?);
        assert!(store.exists("products:1").await?);

        // Nothing left to match
        assert_eq!(store.remove_by_pattern("orders:*").await?, 0);

        store.delete("products:1").await?;
        Ok(())
    }

    pub async fn test_get_many<S: CacheStore>(store: &S) -> Result<()> {
        store.set("many:a", b"A", MINUTE).await?;
        store.set("many:b", b"B", MINUTE).await?;

        let keys = vec![
            "many:a".to_string(),
            "many:missing".to_string(),
            "many:b".to_string(),
        ];
        let values = store.get_many(&keys).await?;
        assert_eq!(
            values,
            vec![Some(b"A".to_vec()), None, Some(b"B".to_vec())]
        );

        assert!(store.get_many(&[]).await?.is_empty());

        store.delete("many:a").await?;
        store.delete("many:b").await?;
        Ok(())
    }

    pub async fn test_clear<S: CacheStore>(store: &S) -> Result<()> {
        store.set("clear:a", b"A", MINUTE).await?;
        store.set("clear:b", b"B", MINUTE).await?;

        store.clear().await?;

        assert!(!store.exists("clear:a").await?);
        assert!(!store.exists("clear:b").await?);
        Ok(())
    }
}
