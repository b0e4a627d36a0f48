// Per-list publish lock. At most one publish may be Processing for an
// auto-list at a time; the lock serializes list-level selection across
// worker instances. Redis SET NX EX with a Lua check-and-delete release.

use crate::db::RedisPool;
use crate::errors::StorageError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock over one auto-list's publish cycle. `try_acquire` is non-blocking:
/// a held lock means a duplicate trigger and the caller no-ops.
#[async_trait]
pub trait ListLock: Send + Sync {
    async fn try_acquire(
        &self,
        list_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<ListLockGuard>, StorageError>;
}

/// Guard that releases the lock when dropped. Backed by a release closure so
/// in-memory test locks and the Redis lock share one guard type.
pub struct ListLockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListLockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Guard that releases nothing (tests).
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for ListLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Redis-backed list lock.
pub struct RedisListLock {
    pool: RedisPool,
}

impl RedisListLock {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn key(list_id: Uuid) -> String {
        format!("publish:list:{}", list_id)
    }
}

#[async_trait]
impl ListLock for RedisListLock {
    async fn try_acquire(
        &self,
        list_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<ListLockGuard>, StorageError> {
        let mut conn = self.pool.get_connection();
        let key = Self::key(list_id);
        let lock_value = Uuid::new_v4().to_string();

        // SET NX EX: atomically claim the list for this publish cycle.
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&lock_value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to acquire list lock: {}", e)))?;

        if result.is_none() {
            debug!(list_id = %list_id, "List lock already held, treating as duplicate trigger");
            return Ok(None);
        }

        debug!(list_id = %list_id, ttl_seconds = ttl.as_secs(), "List lock acquired");

        let pool = self.pool.clone();
        Ok(Some(ListLockGuard::new(move || {
            tokio::spawn(async move {
                if let Err(e) = release(&pool, &key, &lock_value).await {
                    warn!(key = %key, error = %e, "Failed to release list lock on drop");
                }
            });
        })))
    }
}

/// Delete the lock key only if we still own it.
async fn release(pool: &RedisPool, key: &str, lock_value: &str) -> Result<(), StorageError> {
    let mut conn = pool.get_connection();

    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let released: i32 = redis::Script::new(script)
        .key(key)
        .arg(lock_value)
        .invoke_async(&mut conn)
        .await
        .map_err(|e| StorageError::RedisError(format!("Failed to release list lock: {}", e)))?;

    if released == 1 {
        debug!(key = %key, "List lock released");
    } else {
        warn!(key = %key, "List lock was not owned or already expired");
    }

    Ok(())
}
