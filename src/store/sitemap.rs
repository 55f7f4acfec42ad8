use super::Entry;
use crate::error::{Error, Result};
use crate::objects::{ObjectType, SortKey};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, FromRow, Sqlite};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Sitemap lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SitemapStatus {
    /// Created but never (completely) bulk indexed
    Unindexed,
    Indexed,
    /// Bulk indexing in progress
    Indexing,
    /// A job batch is being applied
    Updating,
}

impl fmt::Display for SitemapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SitemapStatus::Unindexed => write!(f, "unindexed"),
            SitemapStatus::Indexed => write!(f, "indexed"),
            SitemapStatus::Indexing => write!(f, "indexing"),
            SitemapStatus::Updating => write!(f, "updating"),
        }
    }
}

impl FromStr for SitemapStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "unindexed" => Ok(SitemapStatus::Unindexed),
            "indexed" => Ok(SitemapStatus::Indexed),
            "indexing" => Ok(SitemapStatus::Indexing),
            "updating" => Ok(SitemapStatus::Updating),
            _ => Err(Error::Config(format!("Unknown sitemap status: {}", s))),
        }
    }
}

/// An ordered index over the objects of one type and subtype
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Sitemap {
    pub id: i64,
    pub object_type: ObjectType,
    pub object_subtype: Option<String>,
    pub status: SitemapStatus,
    pub item_count: i64,
    pub last_object_id: Option<i64>,
    pub last_item_index: Option<i64>,
    pub last_indexed_value: Option<String>,
    pub last_indexed_id: Option<i64>,
    pub last_modified: Option<String>,
}

impl Sitemap {
    /// A new, not yet persisted sitemap
    pub fn for_object_type(object_type: ObjectType, subtype: Option<&str>) -> Self {
        Self {
            id: 0,
            object_type,
            object_subtype: subtype.map(str::to_string),
            status: SitemapStatus::Unindexed,
            item_count: 0,
            last_object_id: None,
            last_item_index: None,
            last_indexed_value: None,
            last_indexed_id: None,
            last_modified: None,
        }
    }

    /// Zero all counters and cursors and mark the sitemap unindexed
    pub fn reset(&mut self) {
        self.status = SitemapStatus::Unindexed;
        self.item_count = 0;
        self.last_object_id = None;
        self.last_item_index = None;
        self.last_indexed_value = None;
        self.last_indexed_id = None;
        self.last_modified = None;
    }

    /// Place `entry` after the current last entry and advance the counters
    pub fn append(&mut self, entry: &mut Entry) {
        entry.item_index = Some(self.item_count);
        self.last_object_id = Some(entry.object_id);
        self.last_item_index = entry.item_index;
        if entry.last_modified > self.last_modified {
            self.last_modified = entry.last_modified.clone();
        }
        self.item_count += 1;
    }

    /// Resume cursor of the bulk indexer
    pub fn last_indexed_key(&self) -> Option<SortKey> {
        match (&self.last_indexed_value, self.last_indexed_id) {
            (Some(value), Some(id)) => Some(SortKey::new(value.clone(), id)),
            _ => None,
        }
    }

    pub fn set_last_indexed_key(&mut self, key: &SortKey) {
        self.last_indexed_value = Some(key.value.clone());
        self.last_indexed_id = Some(key.id);
    }

    /// Name used in page URLs: the subtype, or the object type
    pub fn name(&self) -> &str {
        self.object_subtype
            .as_deref()
            .unwrap_or_else(|| self.object_type.as_str())
    }

    pub fn description(&self) -> String {
        match (self.object_type, self.object_subtype.as_deref()) {
            (ObjectType::Document, Some(kind)) => format!("documents of kind {}", kind),
            (ObjectType::Term, Some(taxonomy)) => format!("terms of taxonomy {}", taxonomy),
            (ObjectType::Account, _) => "authors".to_string(),
            (object_type, None) => format!("all {}s", object_type),
        }
    }

    /// Name of the advisory lock guarding this sitemap
    pub fn lock_name(&self) -> String {
        format!("sitemap_{}", self.id)
    }
}

/// Persistence for sitemap headers
#[derive(Clone)]
pub struct SitemapStore {
    pool: SqlitePool,
}

impl SitemapStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Sitemap>> {
        let sitemap = sqlx::query_as::<_, Sitemap>("SELECT * FROM sitemaps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sitemap)
    }

    /// Like [`get`](Self::get), but a missing sitemap is an error
    pub async fn load(&self, id: i64) -> Result<Sitemap> {
        self.get(id).await?.ok_or(Error::SitemapNotFound(id))
    }

    pub async fn get_by_object_type(
        &self,
        object_type: ObjectType,
        subtype: Option<&str>,
    ) -> Result<Option<Sitemap>> {
        let sitemap = sqlx::query_as::<_, Sitemap>(
            r#"
            SELECT * FROM sitemaps
            WHERE object_type = ? AND COALESCE(object_subtype, '') = COALESCE(?, '')
            "#,
        )
        .bind(object_type)
        .bind(subtype)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sitemap)
    }

    /// All sitemaps of one object type
    pub async fn find_by_object_type(&self, object_type: ObjectType) -> Result<Vec<Sitemap>> {
        let sitemaps = sqlx::query_as::<_, Sitemap>(
            "SELECT * FROM sitemaps WHERE object_type = ? ORDER BY object_subtype, id",
        )
        .bind(object_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(sitemaps)
    }

    pub async fn get_all(&self) -> Result<Vec<Sitemap>> {
        let sitemaps =
            sqlx::query_as::<_, Sitemap>("SELECT * FROM sitemaps ORDER BY object_type, object_subtype")
                .fetch_all(&self.pool)
                .await?;
        Ok(sitemaps)
    }

    /// Sitemaps that can be served: indexed (or being updated) and not empty
    pub async fn viewable(&self) -> Result<Vec<Sitemap>> {
        let sitemaps = sqlx::query_as::<_, Sitemap>(
            r#"
            SELECT * FROM sitemaps
            WHERE status IN ('indexed', 'updating') AND item_count > 0
            ORDER BY object_type, object_subtype
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sitemaps)
    }

    /// Fetch the sitemap for a type and subtype, creating it unindexed if missing
    pub async fn get_or_create(
        &self,
        object_type: ObjectType,
        subtype: Option<&str>,
    ) -> Result<Sitemap> {
        if let Some(sitemap) = self.get_by_object_type(object_type, subtype).await? {
            return Ok(sitemap);
        }

        let mut sitemap = Sitemap::for_object_type(object_type, subtype);
        sqlx::query(
            r#"
            INSERT INTO sitemaps (object_type, object_subtype, status, item_count)
            VALUES (?, ?, ?, 0)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(sitemap.object_type)
        .bind(&sitemap.object_subtype)
        .bind(sitemap.status)
        .execute(&self.pool)
        .await?;

        // Another process may have won the insert; read back whichever row exists
        sitemap = self
            .get_by_object_type(object_type, subtype)
            .await?
            .ok_or_else(|| Error::UnknownSitemap {
                object_type: object_type.to_string(),
                subtype: subtype.map(str::to_string),
            })?;
        debug!(sitemap_id = sitemap.id, "Created sitemap for {}", sitemap.description());
        Ok(sitemap)
    }

    pub async fn update(&self, sitemap: &Sitemap) -> Result<()> {
        Self::write(&self.pool, sitemap).await
    }

    /// Persist every mutable column of `sitemap` through `executor`
    pub async fn write<'e, E>(executor: E, sitemap: &Sitemap) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            UPDATE sitemaps SET
                status = ?,
                item_count = ?,
                last_object_id = ?,
                last_item_index = ?,
                last_indexed_value = ?,
                last_indexed_id = ?,
                last_modified = ?
            WHERE id = ?
            "#,
        )
        .bind(sitemap.status)
        .bind(sitemap.item_count)
        .bind(sitemap.last_object_id)
        .bind(sitemap.last_item_index)
        .bind(&sitemap.last_indexed_value)
        .bind(sitemap.last_indexed_id)
        .bind(&sitemap.last_modified)
        .bind(sitemap.id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Change only the status column
    pub async fn set_status(&self, id: i64, status: SitemapStatus) -> Result<()> {
        sqlx::query("UPDATE sitemaps SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Advance `last_modified` to `last_modified` if it is newer
    pub async fn touch_last_modified(&self, id: i64, last_modified: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sitemaps SET last_modified = ?
            WHERE id = ? AND (last_modified IS NULL OR last_modified < ?)
            "#,
        )
        .bind(last_modified)
        .bind(id)
        .bind(last_modified)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
