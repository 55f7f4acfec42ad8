//! Named lease locks shared between processes
//!
//! A lock is a row in the `locks` table. Whoever inserts the row owns the
//! lock until it deletes the row again. A holder that dies leaves its row
//! behind; once the row is older than the configured maximum age the next
//! acquirer deletes it and takes over.

use crate::config::LockConfig;
use crate::error::Result;
use crate::store::Sitemap;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A named lock with its acquisition policy
#[derive(Clone)]
pub struct Lock {
    pool: SqlitePool,
    name: String,
    max_age: Duration,
    max_tries: u32,
    wait: Duration,
    initial_backoff: Duration,
}

impl Lock {
    pub fn new(pool: SqlitePool, name: impl Into<String>, config: &LockConfig) -> Self {
        Self {
            pool,
            name: name.into(),
            max_age: config.max_age(),
            max_tries: config.max_tries,
            wait: config.wait(),
            initial_backoff: config.initial_backoff(),
        }
    }

    /// The lock serializing all work on one sitemap
    pub fn for_sitemap(pool: SqlitePool, sitemap: &Sitemap, config: &LockConfig) -> Self {
        Self::new(pool, sitemap.lock_name(), config)
    }

    /// Override how long `acquire` may wait; zero means a single attempt
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to take the lock, retrying with exponential backoff.
    ///
    /// Returns `Ok(None)` when the lock is still held by someone else after the
    /// wait ceiling or the retry limit is reached.
    pub async fn acquire(&self) -> Result<Option<LockGuard>> {
        let owner = Uuid::new_v4().simple().to_string();
        let start = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut tries = 0u32;

        loop {
            self.reap_stale().await?;

            if self.try_insert(&owner).await? {
                debug!(lock = %self.name, tries, "Acquired lock");
                return Ok(Some(LockGuard {
                    pool: self.pool.clone(),
                    name: self.name.clone(),
                    owner,
                    released: false,
                }));
            }

            tries += 1;
            if tries >= self.max_tries || start.elapsed() + backoff > self.wait {
                break;
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        debug!(lock = %self.name, tries, "Lock is busy");
        Ok(None)
    }

    /// Whether anyone currently holds the lock
    pub async fn is_held(&self) -> Result<bool> {
        let held: Option<i64> = sqlx::query_scalar("SELECT acquired_at FROM locks WHERE name = ?")
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(held.is_some())
    }

    async fn try_insert(&self, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO locks (name, owner, acquired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(owner)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete the lease if it is older than the maximum age
    async fn reap_stale(&self) -> Result<()> {
        let acquired_at: Option<i64> =
            sqlx::query_scalar("SELECT acquired_at FROM locks WHERE name = ?")
                .bind(&self.name)
                .fetch_optional(&self.pool)
                .await?;

        let Some(acquired_at) = acquired_at else {
            return Ok(());
        };

        let age_ms = Utc::now().timestamp_millis() - acquired_at;
        if age_ms <= self.max_age.as_millis() as i64 {
            return Ok(());
        }

        // Only delete the lease we looked at; a fresh one may have replaced it
        let result = sqlx::query("DELETE FROM locks WHERE name = ? AND acquired_at = ?")
            .bind(&self.name)
            .bind(acquired_at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            warn!(lock = %self.name, age_ms, "Released abandoned lock");
        }
        Ok(())
    }
}

async fn release_lease(pool: &SqlitePool, name: &str, owner: &str) -> Result<()> {
    sqlx::query("DELETE FROM locks WHERE name = ? AND owner = ?")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(())
}

/// Proof of lock ownership; the lease is released on every exit path
pub struct LockGuard {
    pool: SqlitePool,
    name: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renew the lease timestamp; `false` if the lease was lost
    pub async fn refresh(&self) -> Result<bool> {
        let result = sqlx::query("UPDATE locks SET acquired_at = ? WHERE name = ? AND owner = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(&self.name)
            .bind(&self.owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release_lease(&self.pool, &self.name, &self.owner).await?;
        debug!(lock = %self.name, "Released lock");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Dropped on an error path or cancelled; release in the background.
        // Without a runtime the lease simply expires.
        let pool = self.pool.clone();
        let name = std::mem::take(&mut self.name);
        let owner = std::mem::take(&mut self.owner);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = release_lease(&pool, &name, &owner).await {
                    warn!(lock = %name, error = %e, "Failed to release dropped lock");
                }
            });
        }
    }
}

/// Run `f` while holding `lock`.
///
/// Returns `Ok(None)` without running `f` when the lock could not be taken.
pub async fn with_lock<T, F, Fut>(lock: &Lock, f: F) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(guard) = lock.acquire().await? else {
        return Ok(None);
    };

    let result = f().await;
    let released = guard.release().await;
    let value = result?;
    released?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::setup_test_db;

    fn config() -> LockConfig {
        LockConfig {
            max_age_secs: 60,
            max_tries: 10,
            wait_secs: 1,
            initial_backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "sitemap_1", &config()).with_wait(Duration::ZERO);

        let guard = lock.acquire().await.unwrap().expect("first acquire");
        assert!(lock.is_held().await.unwrap());
        assert!(lock.acquire().await.unwrap().is_none());

        guard.release().await.unwrap();
        assert!(!lock.is_held().await.unwrap());
        assert!(lock.acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_lease_is_reclaimed() {
        let (db, _tmp) = setup_test_db().await;
        let stale = Utc::now().timestamp_millis() - 61_000;
        sqlx::query("INSERT INTO locks (name, owner, acquired_at) VALUES ('sitemap_7', 'crashed', ?)")
            .bind(stale)
            .execute(db.pool())
            .await
            .unwrap();

        let lock = Lock::new(db.pool().clone(), "sitemap_7", &config()).with_wait(Duration::ZERO);
        let guard = lock.acquire().await.unwrap();
        assert!(guard.is_some());
    }

    #[tokio::test]
    async fn test_fresh_lease_is_not_reclaimed() {
        let (db, _tmp) = setup_test_db().await;
        let recent = Utc::now().timestamp_millis() - 30_000;
        sqlx::query("INSERT INTO locks (name, owner, acquired_at) VALUES ('sitemap_7', 'other', ?)")
            .bind(recent)
            .execute(db.pool())
            .await
            .unwrap();

        let lock = Lock::new(db.pool().clone(), "sitemap_7", &config()).with_wait(Duration::ZERO);
        assert!(lock.acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_is_bounded() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "busy", &config());
        let _held = lock.acquire().await.unwrap().unwrap();

        let start = Instant::now();
        assert!(lock.acquire().await.unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "handoff", &config());
        let held = lock.acquire().await.unwrap().unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await.map(|g| g.is_some()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        held.release().await.unwrap();

        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "dropped", &config()).with_wait(Duration::ZERO);

        drop(lock.acquire().await.unwrap().unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!lock.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "scoped", &config()).with_wait(Duration::ZERO);

        let value = with_lock(&lock, || async { Ok(7) }).await.unwrap();
        assert_eq!(value, Some(7));
        assert!(!lock.is_held().await.unwrap());

        let _held = lock.acquire().await.unwrap().unwrap();
        let skipped = with_lock(&lock, || async { Ok(1) }).await.unwrap();
        assert_eq!(skipped, None);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "failing", &config()).with_wait(Duration::ZERO);

        let result: Result<Option<()>> =
            with_lock(&lock, || async { Err(crate::Error::Other("boom".into())) }).await;
        assert!(result.is_err());
        assert!(!lock.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_keeps_ownership() {
        let (db, _tmp) = setup_test_db().await;
        let lock = Lock::new(db.pool().clone(), "refresh", &config());
        let guard = lock.acquire().await.unwrap().unwrap();
        assert!(guard.refresh().await.unwrap());

        sqlx::query("DELETE FROM locks").execute(db.pool()).await.unwrap();
        assert!(!guard.refresh().await.unwrap());
    }
}
