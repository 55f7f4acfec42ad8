//! SQLite-backed host object source
//!
//! The host mirrors its documents, accounts and terms into the `host_*`
//! tables; the engine reads them through [`ObjectSource`].

use super::{Account, Document, ObjectSource, OrderBy, SortKey, Term};
use crate::error::Result;
use crate::util::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};

/// Host objects stored next to the sitemap tables
#[derive(Clone)]
pub struct SqliteObjectSource {
    pool: SqlitePool,
}

fn decode_timestamp(row: &SqliteRow, column: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("invalid timestamp '{}'", raw).into(),
    })
}

fn decode_optional_timestamp(
    row: &SqliteRow,
    column: &str,
) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(_) => decode_timestamp(row, column).map(Some),
        None => Ok(None),
    }
}

impl<'r> FromRow<'r, SqliteRow> for Document {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            author_id: row.try_get("author_id")?,
            modified: decode_timestamp(row, "modified")?,
            permalink: row.try_get("permalink")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            login: row.try_get("login")?,
            registered: decode_timestamp(row, "registered")?,
            modified: decode_optional_timestamp(row, "modified")?,
            published_posts: row.try_get("published_posts")?,
            permalink: row.try_get("permalink")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Term {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            term_taxonomy_id: row.try_get("term_taxonomy_id")?,
            term_id: row.try_get("term_id")?,
            taxonomy: row.try_get("taxonomy")?,
            count: row.try_get("count")?,
            permalink: row.try_get("permalink")?,
            last_modified: decode_optional_timestamp(row, "last_modified")?,
            last_modified_object_id: row.try_get("last_modified_object_id")?,
        })
    }
}

/// How the keyset cursor compares against a column
#[derive(Clone, Copy)]
enum Keyset<'a> {
    /// Only the id column orders the rows
    IdOnly,
    Text(&'a str),
    Integer(&'a str),
}

/// Append `AND <after cursor>` plus the ORDER BY / LIMIT tail.
fn push_keyset(
    qb: &mut QueryBuilder<'_, Sqlite>,
    keyset: Keyset<'_>,
    id_column: &str,
    after: Option<&SortKey>,
    limit: usize,
) {
    if let Some(after) = after {
        match keyset {
            Keyset::IdOnly => {
                qb.push(format!(" AND {} > ", id_column)).push_bind(after.id);
            }
            Keyset::Text(column) => {
                qb.push(format!(" AND ({} > ", column))
                    .push_bind(after.value.clone())
                    .push(format!(" OR ({} = ", column))
                    .push_bind(after.value.clone())
                    .push(format!(" AND {} > ", id_column))
                    .push_bind(after.id)
                    .push("))");
            }
            Keyset::Integer(column) => {
                let value = after.integer_value().unwrap_or(0);
                qb.push(format!(" AND ({} > ", column))
                    .push_bind(value)
                    .push(format!(" OR ({} = ", column))
                    .push_bind(value)
                    .push(format!(" AND {} > ", id_column))
                    .push_bind(after.id)
                    .push("))");
            }
        }
    }

    match keyset {
        Keyset::IdOnly => qb.push(format!(" ORDER BY {}", id_column)),
        Keyset::Text(column) | Keyset::Integer(column) => {
            qb.push(format!(" ORDER BY {}, {}", column, id_column))
        }
    };
    qb.push(" LIMIT ").push_bind(limit as i64);
}

impl SqliteObjectSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ===== Host Mirror Writes =====

    pub async fn upsert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO host_documents (id, kind, status, author_id, modified, permalink)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                status = excluded.status,
                author_id = excluded.author_id,
                modified = excluded.modified,
                permalink = excluded.permalink
            "#,
        )
        .bind(document.id)
        .bind(&document.kind)
        .bind(&document.status)
        .bind(document.author_id)
        .bind(format_timestamp(&document.modified))
        .bind(&document.permalink)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_document(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM host_documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO host_accounts (id, login, registered, modified, published_posts, permalink)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                login = excluded.login,
                registered = excluded.registered,
                modified = excluded.modified,
                published_posts = excluded.published_posts,
                permalink = excluded.permalink
            "#,
        )
        .bind(account.id)
        .bind(&account.login)
        .bind(format_timestamp(&account.registered))
        .bind(account.modified.as_ref().map(format_timestamp))
        .bind(account.published_posts)
        .bind(&account.permalink)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_account(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM host_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_term(&self, term: &Term) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO host_terms
                (term_taxonomy_id, term_id, taxonomy, count, permalink, last_modified, last_modified_object_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(term_taxonomy_id) DO UPDATE SET
                term_id = excluded.term_id,
                taxonomy = excluded.taxonomy,
                count = excluded.count,
                permalink = excluded.permalink,
                last_modified = excluded.last_modified,
                last_modified_object_id = excluded.last_modified_object_id
            "#,
        )
        .bind(term.term_taxonomy_id)
        .bind(term.term_id)
        .bind(&term.taxonomy)
        .bind(term.count)
        .bind(&term.permalink)
        .bind(term.last_modified.as_ref().map(format_timestamp))
        .bind(term.last_modified_object_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_term(&self, term_taxonomy_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM host_terms WHERE term_taxonomy_id = ?")
            .bind(term_taxonomy_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_by_ids<O>(&self, table: &str, id_column: &str, ids: &[i64]) -> Result<Vec<O>>
    where
        O: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT * FROM {} WHERE {} IN (",
            table, id_column
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = qb.build_query_as::<O>().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[async_trait]
impl ObjectSource<Document> for SqliteObjectSource {
    async fn get(&self, object_id: i64) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM host_documents WHERE id = ?")
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    async fn get_many(&self, object_ids: &[i64]) -> Result<Vec<Document>> {
        self.fetch_by_ids("host_documents", "id", object_ids).await
    }

    async fn list(
        &self,
        subtype: Option<&str>,
        order_by: OrderBy,
        after: Option<&SortKey>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM host_documents WHERE 1 = 1");
        if let Some(kind) = subtype {
            qb.push(" AND kind = ").push_bind(kind.to_string());
        }
        let keyset = match order_by {
            OrderBy::Modified => Keyset::Text("modified"),
            _ => Keyset::IdOnly,
        };
        push_keyset(&mut qb, keyset, "id", after, limit);

        let documents = qb.build_query_as::<Document>().fetch_all(&self.pool).await?;
        Ok(documents)
    }
}

#[async_trait]
impl ObjectSource<Account> for SqliteObjectSource {
    async fn get(&self, object_id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM host_accounts WHERE id = ?")
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn get_many(&self, object_ids: &[i64]) -> Result<Vec<Account>> {
        self.fetch_by_ids("host_accounts", "id", object_ids).await
    }

    async fn list(
        &self,
        _subtype: Option<&str>,
        order_by: OrderBy,
        after: Option<&SortKey>,
        limit: usize,
    ) -> Result<Vec<Account>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM host_accounts WHERE 1 = 1");
        let keyset = match order_by {
            OrderBy::Registered => Keyset::Text("registered"),
            OrderBy::Login => Keyset::Text("login"),
            _ => Keyset::IdOnly,
        };
        push_keyset(&mut qb, keyset, "id", after, limit);

        let accounts = qb.build_query_as::<Account>().fetch_all(&self.pool).await?;
        Ok(accounts)
    }
}

#[async_trait]
impl ObjectSource<Term> for SqliteObjectSource {
    async fn get(&self, object_id: i64) -> Result<Option<Term>> {
        let term = sqlx::query_as::<_, Term>("SELECT * FROM host_terms WHERE term_taxonomy_id = ?")
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(term)
    }

    async fn get_many(&self, object_ids: &[i64]) -> Result<Vec<Term>> {
        self.fetch_by_ids("host_terms", "term_taxonomy_id", object_ids)
            .await
    }

    async fn list(
        &self,
        subtype: Option<&str>,
        order_by: OrderBy,
        after: Option<&SortKey>,
        limit: usize,
    ) -> Result<Vec<Term>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM host_terms WHERE 1 = 1");
        if let Some(taxonomy) = subtype {
            qb.push(" AND taxonomy = ").push_bind(taxonomy.to_string());
        }
        let keyset = match order_by {
            OrderBy::TermId => Keyset::Integer("term_id"),
            _ => Keyset::IdOnly,
        };
        push_keyset(&mut qb, keyset, "term_taxonomy_id", after, limit);

        let terms = qb.build_query_as::<Term>().fetch_all(&self.pool).await?;
        Ok(terms)
    }
}
