// Trigger watermark store: the last minute bucket each spec fired for.
// The compare-and-set is atomic so horizontally-scaled evaluators advance a
// given spec's watermark at most once per minute.

use crate::db::RedisPool;
use crate::errors::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Advance the watermark for `spec_id` to `minute_bucket` if and only if
    /// the stored value is strictly earlier (or absent). Returns true when
    /// this caller advanced it and therefore owns the fire.
    async fn try_advance(&self, spec_id: Uuid, minute_bucket: i64) -> Result<bool, StorageError>;

    /// Last fired minute bucket, if any.
    async fn last_fired(&self, spec_id: Uuid) -> Result<Option<i64>, StorageError>;
}

/// Redis-backed watermark store. The conditional advance runs as a single
/// Lua script so the compare and the set are one atomic operation.
pub struct RedisWatermarkStore {
    pool: RedisPool,
}

const ADVANCE_SCRIPT: &str = r#"
    local current = redis.call("get", KEYS[1])
    if current == false or tonumber(current) < tonumber(ARGV[1]) then
        redis.call("set", KEYS[1], ARGV[1])
        return 1
    end
    return 0
"#;

impl RedisWatermarkStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn key(spec_id: Uuid) -> String {
        format!("watermark:spec:{}", spec_id)
    }
}

#[async_trait]
impl WatermarkStore for RedisWatermarkStore {
    async fn try_advance(&self, spec_id: Uuid, minute_bucket: i64) -> Result<bool, StorageError> {
        let mut conn = self.pool.get_connection();

        let advanced: i32 = redis::Script::new(ADVANCE_SCRIPT)
            .key(Self::key(spec_id))
            .arg(minute_bucket)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Watermark advance failed: {}", e)))?;

        if advanced == 1 {
            debug!(spec_id = %spec_id, minute_bucket, "Watermark advanced");
        }

        Ok(advanced == 1)
    }

    async fn last_fired(&self, spec_id: Uuid) -> Result<Option<i64>, StorageError> {
        let mut conn = self.pool.get_connection();

        let value: Option<i64> = redis::cmd("GET")
            .arg(Self::key(spec_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Watermark read failed: {}", e)))?;

        Ok(value)
    }
}

/// In-memory watermark store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    watermarks: Mutex<HashMap<Uuid, i64>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn try_advance(&self, spec_id: Uuid, minute_bucket: i64) -> Result<bool, StorageError> {
        let mut watermarks = self.watermarks.lock().expect("watermark lock poisoned");
        match watermarks.get(&spec_id) {
            Some(current) if *current >= minute_bucket => Ok(false),
            _ => {
                watermarks.insert(spec_id, minute_bucket);
                Ok(true)
            }
        }
    }

    async fn last_fired(&self, spec_id: Uuid) -> Result<Option<i64>, StorageError> {
        let watermarks = self.watermarks.lock().expect("watermark lock poisoned");
        Ok(watermarks.get(&spec_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_advance_wins() {
        let store = InMemoryWatermarkStore::new();
        let spec_id = Uuid::new_v4();

        assert!(store.try_advance(spec_id, 100).await.unwrap());
        assert_eq!(store.last_fired(spec_id).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_same_bucket_advances_once() {
        let store = InMemoryWatermarkStore::new();
        let spec_id = Uuid::new_v4();

        assert!(store.try_advance(spec_id, 100).await.unwrap());
        assert!(!store.try_advance(spec_id, 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let store = InMemoryWatermarkStore::new();
        let spec_id = Uuid::new_v4();

        assert!(store.try_advance(spec_id, 100).await.unwrap());
        // Earlier bucket never rolls the watermark back.
        assert!(!store.try_advance(spec_id, 99).await.unwrap());
        assert_eq!(store.last_fired(spec_id).await.unwrap(), Some(100));

        assert!(store.try_advance(spec_id, 101).await.unwrap());
        assert_eq!(store.last_fired(spec_id).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn test_specs_are_independent() {
        let store = InMemoryWatermarkStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(store.try_advance(a, 100).await.unwrap());
        assert!(store.try_advance(b, 100).await.unwrap());
    }
}
