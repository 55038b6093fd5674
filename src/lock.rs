//! Advisory locks backed by the `index_locks` table.
//!
//! A lock is a row keyed by `lock_id`. Acquisition is an `INSERT OR IGNORE`:
//! exactly one contender sees a row inserted. Rows carry an expiry so a
//! lock abandoned by a crashed process is reclaimed after the TTL.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use index_harness_core::lock::{LockGuard, LockManager};
use index_harness_core::IndexError;

use crate::config::LockConfig;

pub struct SqliteLockManager {
    pool: SqlitePool,
    ttl: Duration,
    poll_interval: Duration,
    timeout: Duration,
}

impl SqliteLockManager {
    pub fn new(pool: SqlitePool, config: &LockConfig) -> Self {
        Self {
            pool,
            ttl: Duration::from_secs(config.ttl_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.acquire_timeout_secs),
        }
    }

    /// One acquisition attempt. Returns true if the row was inserted.
    async fn try_acquire(&self, lock_id: i64, holder: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("DELETE FROM index_locks WHERE lock_id = ? AND expires_at <= ?")
            .bind(lock_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO index_locks (lock_id, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(lock_id)
        .bind(holder)
        .bind(now)
        .bind(now + self.ttl.as_secs() as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }
}

#[async_trait]
impl LockManager for SqliteLockManager {
    async fn acquire(&self, lock_id: i64) -> Result<Box<dyn LockGuard>> {
        let holder = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut waited = false;

        loop {
            if self.try_acquire(lock_id, &holder).await? {
                tracing::debug!(lock_id, holder = %holder, waited, "lock acquired");
                return Ok(Box::new(SqliteLockGuard {
                    pool: self.pool.clone(),
                    lock_id,
                    holder,
                    released: false,
                }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(IndexError::LockTimeout(lock_id).into());
            }
            if !waited {
                tracing::info!(lock_id, "waiting for lock held by another run");
                waited = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Held lock. Dropping it without [`release`](LockGuard::release) (a
/// cancelled run) deletes the row in the background on the current runtime.
pub struct SqliteLockGuard {
    pool: SqlitePool,
    lock_id: i64,
    holder: String,
    released: bool,
}

async fn delete_lock(pool: &SqlitePool, lock_id: i64, holder: &str) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM index_locks WHERE lock_id = ? AND holder = ?")
        .bind(lock_id)
        .bind(holder)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

#[async_trait]
impl LockGuard for SqliteLockGuard {
    fn lock_id(&self) -> i64 {
        self.lock_id
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let mut guard = self;
        let released = delete_lock(&guard.pool, guard.lock_id, &guard.holder).await?;
        guard.released = true;
        if released == 0 {
            tracing::warn!(lock_id = guard.lock_id, "lock already expired before release");
        } else {
            tracing::debug!(lock_id = guard.lock_id, "lock released");
        }
        Ok(())
    }
}

impl Drop for SqliteLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock_id = self.lock_id;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock_id, "lock dropped outside a runtime; it expires after its ttl");
            return;
        };
        let pool = self.pool.clone();
        let holder = std::mem::take(&mut self.holder);
        tracing::debug!(lock_id, "lock dropped without release; releasing in background");
        handle.spawn(async move {
            if let Err(e) = delete_lock(&pool, lock_id, &holder).await {
                tracing::warn!(lock_id, error = %e, "background lock release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        pool
    }

    fn quick() -> LockConfig {
        LockConfig {
            ttl_secs: 60,
            poll_interval_ms: 5,
            acquire_timeout_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let manager = SqliteLockManager::new(pool().await, &quick());
        let guard = manager.acquire(42).await.unwrap();

        let err = manager.acquire(42).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::LockTimeout(42))
        ));

        // Unrelated lock ids don't contend.
        let other = manager.acquire(43).await.unwrap();
        other.release().await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let manager = SqliteLockManager::new(pool().await, &quick());
        manager.acquire(7).await.unwrap().release().await.unwrap();
        let guard = manager.acquire(7).await.unwrap();
        assert_eq!(guard.lock_id(), 7);
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_frees_lock() {
        let config = LockConfig {
            ttl_secs: 900,
            poll_interval_ms: 5,
            acquire_timeout_secs: 5,
        };
        let manager = SqliteLockManager::new(pool().await, &config);

        let guard = manager.acquire(1).await.unwrap();
        drop(guard);

        // Well inside the ttl, so only the background release can free it.
        let guard = manager.acquire(1).await.unwrap();
        guard.release().await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_locks")
            .fetch_one(&manager.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimed() {
        let pool = pool().await;
        sqlx::query(
            "INSERT INTO index_locks (lock_id, holder, acquired_at, expires_at) VALUES (9, 'dead', 0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let manager = SqliteLockManager::new(pool, &quick());
        let guard = manager.acquire(9).await.unwrap();
        guard.release().await.unwrap();
    }
}
