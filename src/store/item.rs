use super::Sitemap;
use crate::error::Result;
use crate::objects::{HostObject, ObjectType, OrderBy, SortKey};
use crate::util::format_timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{FromRow, Sqlite, Transaction};

/// One object's row in a sitemap
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub sitemap_id: i64,
    pub object_id: i64,
    /// URL relative to the site home
    pub url: String,
    /// Canonical order value captured when the entry was (re)positioned
    pub sort_value: String,
    pub last_modified: Option<String>,
    pub last_modified_object_id: Option<i64>,
    /// Position in the sitemap; `None` only while a reindex is in flight
    pub item_index: Option<i64>,
    /// Scratch position used by a reindex pass
    pub next_item_index: Option<i64>,
}

impl Entry {
    /// A new, not yet persisted entry for `object` in `sitemap`
    pub fn for_object<O: HostObject>(
        object: &O,
        sitemap: &Sitemap,
        url: String,
        order_by: OrderBy,
    ) -> Self {
        Self {
            id: 0,
            sitemap_id: sitemap.id,
            object_id: object.object_id(),
            url,
            sort_value: object.sort_key(order_by).value,
            last_modified: object.last_modified().as_ref().map(format_timestamp),
            last_modified_object_id: object.last_modified_object_id(),
            item_index: None,
            next_item_index: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.id > 0
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.sort_value.clone(), self.object_id)
    }

    /// Copy the object-derived columns of `fresh` (a rebuilt entry for the same object)
    pub fn refresh_from(&mut self, fresh: &Entry) {
        self.url = fresh.url.clone();
        self.sort_value = fresh.sort_value.clone();
        self.last_modified = fresh.last_modified.clone();
        self.last_modified_object_id = fresh.last_modified_object_id;
    }
}

/// Persistence for the entries of one object type
#[derive(Clone)]
pub struct ItemStore {
    pool: SqlitePool,
    object_type: ObjectType,
}

impl ItemStore {
    pub fn new(pool: SqlitePool, object_type: ObjectType) -> Self {
        Self { pool, object_type }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    fn table(&self) -> &'static str {
        self.object_type.entry_table()
    }

    /// Start the transaction a reindex pass runs in
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ===== Lookups =====

    pub async fn get(&self, id: i64) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(&format!("SELECT * FROM {} WHERE id = ?", self.table()))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    pub async fn get_in_sitemap(&self, sitemap_id: i64, object_id: i64) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            "SELECT * FROM {} WHERE sitemap_id = ? AND object_id = ?",
            self.table()
        ))
        .bind(sitemap_id)
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Entries for an object across all sitemaps of this type
    pub async fn find_by_object_id(&self, object_id: i64) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(&format!(
            "SELECT * FROM {} WHERE object_id = ? ORDER BY id",
            self.table()
        ))
        .bind(object_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn get_one_by_object_id(&self, object_id: i64) -> Result<Option<Entry>> {
        Ok(self.find_by_object_id(object_id).await?.into_iter().next())
    }

    /// Entry with the highest position
    pub async fn get_last_item(&self, sitemap_id: i64) -> Result<Option<Entry>> {
        let mut conn = self.pool.acquire().await?;
        self.last_item_in(&mut conn, sitemap_id).await
    }

    /// Number of positioned entries
    pub async fn count(&self, sitemap_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE sitemap_id = ? AND item_index IS NOT NULL",
            self.table()
        ))
        .bind(sitemap_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Up to `limit` entries starting at position `from`, walking up or down
    pub async fn items_from(
        &self,
        sitemap_id: i64,
        from: i64,
        limit: usize,
        descending: bool,
    ) -> Result<Vec<Entry>> {
        let sql = if descending {
            format!(
                "SELECT * FROM {} WHERE sitemap_id = ? AND item_index <= ? ORDER BY item_index DESC LIMIT ?",
                self.table()
            )
        } else {
            format!(
                "SELECT * FROM {} WHERE sitemap_id = ? AND item_index >= ? ORDER BY item_index LIMIT ?",
                self.table()
            )
        };
        let entries = sqlx::query_as::<_, Entry>(&sql)
            .bind(sitemap_id)
            .bind(from)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    /// Latest modification date among positions `from..=to`
    pub async fn max_last_modified(&self, sitemap_id: i64, from: i64, to: i64) -> Result<Option<String>> {
        let last_modified: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX(last_modified) FROM {} WHERE sitemap_id = ? AND item_index BETWEEN ? AND ?",
            self.table()
        ))
        .bind(sitemap_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(last_modified)
    }

    // ===== Writes =====

    pub async fn insert_item(&self, entry: &mut Entry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.insert_in(&mut conn, entry).await
    }

    /// Insert `entry` and store the new row id on it
    pub async fn insert_in(&self, conn: &mut SqliteConnection, entry: &mut Entry) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (sitemap_id, object_id, url, sort_value, last_modified,
                            last_modified_object_id, item_index, next_item_index)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table()
        ))
        .bind(entry.sitemap_id)
        .bind(entry.object_id)
        .bind(&entry.url)
        .bind(&entry.sort_value)
        .bind(&entry.last_modified)
        .bind(entry.last_modified_object_id)
        .bind(entry.item_index)
        .bind(entry.next_item_index)
        .execute(&mut *conn)
        .await?;
        entry.id = result.last_insert_rowid();
        Ok(())
    }

    pub async fn update_item(&self, entry: &Entry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.update_in(&mut conn, entry).await
    }

    pub async fn update_in(&self, conn: &mut SqliteConnection, entry: &Entry) -> Result<()> {
        sqlx::query(&format!(
            r#"
            UPDATE {} SET
                url = ?,
                sort_value = ?,
                last_modified = ?,
                last_modified_object_id = ?,
                item_index = ?,
                next_item_index = ?
            WHERE id = ?
            "#,
            self.table()
        ))
        .bind(&entry.url)
        .bind(&entry.sort_value)
        .bind(&entry.last_modified)
        .bind(entry.last_modified_object_id)
        .bind(entry.item_index)
        .bind(entry.next_item_index)
        .bind(entry.id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Replace the URL without touching the ordering
    pub async fn update_url(&self, id: i64, url: &str) -> Result<()> {
        sqlx::query(&format!("UPDATE {} SET url = ? WHERE id = ?", self.table()))
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_last_modified(&self, entry: &Entry) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET last_modified = ?, last_modified_object_id = ? WHERE id = ?",
            self.table()
        ))
        .bind(&entry.last_modified)
        .bind(entry.last_modified_object_id)
        .bind(entry.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_for_sitemap(&self, sitemap_id: i64) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE sitemap_id = ?", self.table()))
            .bind(sitemap_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ===== Reindex Primitives =====
    //
    // These run on the connection of the reindex transaction.

    /// Entries of a sitemap with an id greater than `after_id`, by id
    pub async fn list_in(
        &self,
        conn: &mut SqliteConnection,
        sitemap_id: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(&format!(
            "SELECT * FROM {} WHERE sitemap_id = ? AND id > ? ORDER BY id LIMIT ?",
            self.table()
        ))
        .bind(sitemap_id)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
        Ok(entries)
    }

    pub async fn last_item_in(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<Option<Entry>> {
        let entry = sqlx::query_as::<_, Entry>(&format!(
            r#"
            SELECT * FROM {} WHERE sitemap_id = ? AND item_index IS NOT NULL
            ORDER BY item_index DESC LIMIT 1
            "#,
            self.table()
        ))
        .bind(sitemap_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(entry)
    }

    pub async fn max_last_modified_in(
        &self,
        conn: &mut SqliteConnection,
        sitemap_id: i64,
    ) -> Result<Option<String>> {
        let last_modified: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX(last_modified) FROM {} WHERE sitemap_id = ? AND item_index IS NOT NULL",
            self.table()
        ))
        .bind(sitemap_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(last_modified)
    }

    /// One past the highest committed position
    pub async fn index_end(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<i64> {
        let end: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(item_index) + 1, 0) FROM {} WHERE sitemap_id = ?",
            self.table()
        ))
        .bind(sitemap_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(end)
    }

    /// Start a pass: every positioned row keeps its position
    pub async fn seed_next_index(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET next_item_index = item_index WHERE sitemap_id = ?",
            self.table()
        ))
        .bind(sitemap_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn clear_next_index(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET next_item_index = NULL WHERE sitemap_id = ?",
            self.table()
        ))
        .bind(sitemap_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn set_next_index(
        &self,
        conn: &mut SqliteConnection,
        entry_id: i64,
        next: Option<i64>,
    ) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET next_item_index = ? WHERE id = ?",
            self.table()
        ))
        .bind(next)
        .bind(entry_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Smallest scratch position among rows that sort after `key`
    pub async fn next_index_after(
        &self,
        conn: &mut SqliteConnection,
        sitemap_id: i64,
        key: &SortKey,
    ) -> Result<Option<i64>> {
        let index: Option<i64> = sqlx::query_scalar(&format!(
            r#"
            SELECT MIN(next_item_index) FROM {}
            WHERE sitemap_id = ? AND next_item_index IS NOT NULL
              AND (sort_value > ? OR (sort_value = ? AND object_id > ?))
            "#,
            self.table()
        ))
        .bind(sitemap_id)
        .bind(&key.value)
        .bind(&key.value)
        .bind(key.id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(index)
    }

    /// Move surviving rows with committed positions in `from..=to` by `offset`.
    ///
    /// Rows are selected by `item_index`, which does not change during the
    /// pass, so one row is never moved twice.
    pub async fn shift_next_index(
        &self,
        conn: &mut SqliteConnection,
        sitemap_id: i64,
        offset: i64,
        from: i64,
        to: Option<i64>,
    ) -> Result<u64> {
        let mut sql = format!(
            r#"
            UPDATE {} SET next_item_index = item_index + ?
            WHERE sitemap_id = ? AND next_item_index IS NOT NULL AND item_index >= ?
            "#,
            self.table()
        );
        if to.is_some() {
            sql.push_str(" AND item_index <= ?");
        }

        let mut query = sqlx::query(&sql).bind(offset).bind(sitemap_id).bind(from);
        if let Some(to) = to {
            query = query.bind(to);
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    /// Number every row that has a scratch position 0.. in canonical order
    pub async fn rank_next_index(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<u64> {
        let table = self.table();
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table} SET next_item_index = ranked.position
            FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY sort_value, object_id) - 1 AS position
                FROM {table}
                WHERE sitemap_id = ? AND next_item_index IS NOT NULL
            ) AS ranked
            WHERE {table}.id = ranked.id
            "#
        ))
        .bind(sitemap_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Make scratch positions authoritative
    pub async fn commit_next_index(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET item_index = next_item_index, next_item_index = NULL WHERE sitemap_id = ?",
            self.table()
        ))
        .bind(sitemap_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Drop rows that ended a pass without a position
    pub async fn delete_unindexed(&self, conn: &mut SqliteConnection, sitemap_id: i64) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE sitemap_id = ? AND item_index IS NULL",
            self.table()
        ))
        .bind(sitemap_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
