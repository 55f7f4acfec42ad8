//! Sitemap storage using SQLite
//!
//! This module handles all persisted state:
//! - Sitemaps (header row with counters, cursors and status)
//! - Entries (one table per object type)
//! - Jobs and lock leases (tables created here, used by `jobs` and `lock`)

mod item;
mod schema;
mod sitemap;

pub use item::*;
pub use schema::*;
pub use sitemap::*;

use crate::config::Config;
use crate::error::Result;
use crate::jobs::JobStore;
use crate::objects::{ObjectType, SqliteObjectSource};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Database handle
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect to the database configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Connect to (and create if missing) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='sitemaps'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sitemaps(&self) -> SitemapStore {
        SitemapStore::new(self.pool.clone())
    }

    pub fn items(&self, object_type: ObjectType) -> ItemStore {
        ItemStore::new(self.pool.clone(), object_type)
    }

    pub fn jobs(&self) -> JobStore {
        JobStore::new(self.pool.clone())
    }

    /// Host objects mirrored into this database
    pub fn object_source(&self) -> SqliteObjectSource {
        SqliteObjectSource::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db = Db::new(&tmp.path().join("nested").join("sitemaps.db")).await.unwrap();

        assert!(!db.is_initialized().await.unwrap());
        db.init_schema().await.unwrap();
        db.init_schema().await.unwrap();
        assert!(db.is_initialized().await.unwrap());
    }
}
