//! Durable queue of pending sitemap mutations
//!
//! Jobs are keyed by (sitemap, object, action); scheduling the same pending
//! job twice is a no-op. A [`JobRunner`] claims a batch of jobs for one
//! sitemap, folds them into per-action sets, and deletes them once the batch
//! has been applied.

mod runner;

pub use runner::*;

use crate::error::{Error, Result};
use crate::store::Entry;
use crate::util::{format_timestamp, now_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Jobs claimed per run unless configured otherwise
pub const MAX_JOBS_CLAIMED: usize = 25;

/// What a job does to its sitemap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobAction {
    AddItem,
    RemoveItem,
    ReindexItem,
    ReindexSitemap,
    UpdateLastModified,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::AddItem => write!(f, "add_item"),
            JobAction::RemoveItem => write!(f, "remove_item"),
            JobAction::ReindexItem => write!(f, "reindex_item"),
            JobAction::ReindexSitemap => write!(f, "reindex_sitemap"),
            JobAction::UpdateLastModified => write!(f, "update_last_modified"),
        }
    }
}

impl FromStr for JobAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add_item" => Ok(JobAction::AddItem),
            "remove_item" => Ok(JobAction::RemoveItem),
            "reindex_item" => Ok(JobAction::ReindexItem),
            "reindex_sitemap" => Ok(JobAction::ReindexSitemap),
            "update_last_modified" => Ok(JobAction::UpdateLastModified),
            _ => Err(Error::Config(format!("Unknown job action: {}", s))),
        }
    }
}

/// A pending mutation of one sitemap
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub sitemap_id: i64,
    pub sitemap_item_id: Option<i64>,
    pub object_id: Option<i64>,
    pub action: JobAction,
    pub scheduled_at: String,
    pub claim_id: Option<String>,
    pub claimed_at: Option<String>,
}

impl Job {
    fn new(sitemap_id: i64, sitemap_item_id: Option<i64>, object_id: Option<i64>, action: JobAction) -> Self {
        Self {
            id: 0,
            sitemap_id,
            sitemap_item_id,
            object_id,
            action,
            scheduled_at: now_timestamp(),
            claim_id: None,
            claimed_at: None,
        }
    }

    pub fn add_item(sitemap_id: i64, object_id: i64) -> Self {
        Self::new(sitemap_id, None, Some(object_id), JobAction::AddItem)
    }

    pub fn remove_item(entry: &Entry) -> Self {
        Self::new(entry.sitemap_id, Some(entry.id), Some(entry.object_id), JobAction::RemoveItem)
    }

    pub fn reindex_item(entry: &Entry) -> Self {
        Self::new(entry.sitemap_id, Some(entry.id), Some(entry.object_id), JobAction::ReindexItem)
    }

    pub fn update_last_modified(entry: &Entry) -> Self {
        Self::new(
            entry.sitemap_id,
            Some(entry.id),
            Some(entry.object_id),
            JobAction::UpdateLastModified,
        )
    }

    pub fn reindex_sitemap(sitemap_id: i64) -> Self {
        Self::new(sitemap_id, None, None, JobAction::ReindexSitemap)
    }
}

/// Pending jobs per sitemap, for status output
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PendingJobs {
    pub sitemap_id: i64,
    pub pending: i64,
    pub claimed: i64,
}

/// Job queue persistence
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Schedule a job; `false` if an identical unclaimed job already exists
    pub async fn insert_job(&self, job: &Job) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sitemap_jobs (sitemap_id, sitemap_item_id, object_id, action, scheduled_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(job.sitemap_id)
        .bind(job.sitemap_item_id)
        .bind(job.object_id)
        .bind(job.action)
        .bind(&job.scheduled_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(
            sitemap_id = job.sitemap_id,
            object_id = ?job.object_id,
            action = %job.action,
            inserted,
            "Scheduled job"
        );
        Ok(inserted)
    }

    /// Stamp up to `limit` due, unclaimed jobs of a sitemap with `claim_id`.
    ///
    /// The select and the stamp are one statement, and SQLite runs one writer
    /// at a time, so concurrent claims never overlap.
    pub async fn claim_jobs(&self, sitemap_id: i64, claim_id: &str, limit: usize) -> Result<u64> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE sitemap_jobs SET claim_id = ?, claimed_at = ?
            WHERE id IN (
                SELECT id FROM sitemap_jobs
                WHERE sitemap_id = ? AND claim_id IS NULL AND scheduled_at <= ?
                ORDER BY scheduled_at, id
                LIMIT ?
            )
            "#,
        )
        .bind(claim_id)
        .bind(&now)
        .bind(sitemap_id)
        .bind(&now)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_by_claim_id(&self, claim_id: &str) -> Result<Vec<Job>> {
        let jobs =
            sqlx::query_as::<_, Job>("SELECT * FROM sitemap_jobs WHERE claim_id = ? ORDER BY id")
                .bind(claim_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(jobs)
    }

    /// Delete every job carrying `claim_id`
    pub async fn delete_claimed(&self, claim_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sitemap_jobs WHERE claim_id = ?")
            .bind(claim_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Make claimed jobs claimable again.
    ///
    /// A job that was rescheduled while claimed already has an unclaimed twin;
    /// the claimed copy is dropped instead of colliding with it.
    pub async fn release_claim(&self, claim_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM sitemap_jobs AS claimed
            WHERE claimed.claim_id = ?
              AND EXISTS (
                  SELECT 1 FROM sitemap_jobs AS pending
                  WHERE pending.claim_id IS NULL
                    AND pending.sitemap_id = claimed.sitemap_id
                    AND COALESCE(pending.object_id, -1) = COALESCE(claimed.object_id, -1)
                    AND pending.action = claimed.action
              )
            "#,
        )
        .bind(claim_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE sitemap_jobs SET claim_id = NULL, claimed_at = NULL WHERE claim_id = ?",
        )
        .bind(claim_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Claim ids on a sitemap's jobs that were stamped before `before`
    pub async fn stale_claims(&self, sitemap_id: i64, before: &DateTime<Utc>) -> Result<Vec<String>> {
        let claims: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT claim_id FROM sitemap_jobs
            WHERE sitemap_id = ? AND claim_id IS NOT NULL AND claimed_at < ?
            "#,
        )
        .bind(sitemap_id)
        .bind(format_timestamp(before))
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    /// Pending and claimed job counts per sitemap
    pub async fn pending_by_sitemap(&self) -> Result<Vec<PendingJobs>> {
        let counts = sqlx::query_as::<_, PendingJobs>(
            r#"
            SELECT sitemap_id,
                   SUM(CASE WHEN claim_id IS NULL THEN 1 ELSE 0 END) AS pending,
                   SUM(CASE WHEN claim_id IS NULL THEN 0 ELSE 1 END) AS claimed
            FROM sitemap_jobs
            GROUP BY sitemap_id
            ORDER BY sitemap_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    /// All jobs of a sitemap, oldest first
    pub async fn list_for_sitemap(&self, sitemap_id: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM sitemap_jobs WHERE sitemap_id = ? ORDER BY scheduled_at, id",
        )
        .bind(sitemap_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}
