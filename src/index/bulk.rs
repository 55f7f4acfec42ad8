//! Bulk population of sitemaps from the host's objects
//!
//! The indexer walks host objects in canonical order and appends every
//! indexable one, a page at a time. Each page commits its entries together
//! with the advanced cursor, so an interrupted run resumes where it stopped.

use crate::error::{Error, Result};
use crate::lock::LockGuard;
use crate::objects::{HostObject, ObjectType};
use crate::progress::{advance_progress, finish_progress, start_counter};
use crate::provider::{ObjectPolicy, Provider};
use crate::store::{Sitemap, SitemapStatus, SitemapStore};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of indexing one sitemap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub object_type: ObjectType,
    pub subtype: Option<String>,
    pub objects_indexed: usize,
    pub error: Option<String>,
}

/// Populates the sitemaps of one provider
pub struct Indexer<'a, P: ObjectPolicy> {
    provider: &'a Provider<P>,
    show_progress: bool,
}

impl<'a, P: ObjectPolicy> Indexer<'a, P> {
    pub fn new(provider: &'a Provider<P>) -> Self {
        Self {
            provider,
            show_progress: false,
        }
    }

    /// Show a pinned progress counter per sitemap
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Index every sitemap of the provider, or only the listed subtypes.
    ///
    /// Failures are reported per sitemap and never stop the others.
    pub async fn index(&self, subtypes: Option<&[String]>, force_recreate: bool) -> Vec<IndexReport> {
        let mut reports = Vec::new();

        for subtype in self.provider.policy().subtypes() {
            if let Some(selected) = subtypes {
                if !subtype.as_ref().is_some_and(|s| selected.contains(s)) {
                    continue;
                }
            }

            let mut report = IndexReport {
                object_type: self.provider.object_type(),
                subtype: subtype.clone(),
                objects_indexed: 0,
                error: None,
            };
            match self.index_subtype(subtype.as_deref(), force_recreate).await {
                Ok(indexed) => report.objects_indexed = indexed,
                Err(e) => {
                    warn!(
                        object_type = %report.object_type,
                        subtype = subtype.as_deref().unwrap_or("-"),
                        error = %e,
                        "Indexing failed"
                    );
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        reports
    }

    async fn index_subtype(&self, subtype: Option<&str>, force_recreate: bool) -> Result<usize> {
        let sitemap = self
            .provider
            .sitemaps()
            .get_or_create(self.provider.object_type(), subtype)
            .await?;

        let lock = self.provider.sitemap_lock(&sitemap);
        let guard = lock
            .acquire()
            .await?
            .ok_or_else(|| Error::LockUnavailable(sitemap.description()))?;

        let result = self.index_locked(&guard, sitemap.id, force_recreate).await;
        let released = guard.release().await;
        let indexed = result?;
        released?;
        Ok(indexed)
    }

    async fn index_locked(&self, guard: &LockGuard, sitemap_id: i64, force_recreate: bool) -> Result<usize> {
        let sitemaps = self.provider.sitemaps();
        let items = self.provider.items();
        let mut sitemap = sitemaps.load(sitemap_id).await?;

        if force_recreate {
            let deleted = items.delete_for_sitemap(sitemap.id).await?;
            info!(sitemap_id, deleted, "Recreating {}", sitemap.description());
            sitemap.reset();
        } else if matches!(sitemap.status, SitemapStatus::Indexed | SitemapStatus::Updating) {
            return Err(Error::AlreadyIndexed(sitemap.description()));
        } else if sitemap.status == SitemapStatus::Indexing {
            info!(sitemap_id, cursor = ?sitemap.last_indexed_key(), "Resuming interrupted indexing");
        }

        sitemap.status = SitemapStatus::Indexing;
        sitemaps.update(&sitemap).await?;

        let progress = self
            .show_progress
            .then(|| start_counter(&format!("Indexing {}", sitemap.description())));

        let indexed = match self.index_pages(guard, &mut sitemap, &progress).await {
            Ok(indexed) => indexed,
            Err(e) => {
                finish_progress(progress, "Interrupted");
                return Err(e);
            }
        };

        sitemap.status = SitemapStatus::Indexed;
        sitemaps.update(&sitemap).await?;
        finish_progress(progress, &format!("Indexed {} objects", indexed));

        info!(
            sitemap_id,
            indexed,
            item_count = sitemap.item_count,
            "Finished indexing {}",
            sitemap.description()
        );
        Ok(indexed)
    }

    /// Append pages of objects after the stored cursor until the source runs out
    async fn index_pages(
        &self,
        guard: &LockGuard,
        sitemap: &mut Sitemap,
        progress: &Option<ProgressBar>,
    ) -> Result<usize> {
        let policy = self.provider.policy();
        let items = self.provider.items();
        let page_size = self.provider.index_page_size().max(1);
        let mut cursor = sitemap.last_indexed_key();
        let mut indexed = 0;

        loop {
            let objects = self
                .provider
                .source()
                .list(sitemap.object_subtype.as_deref(), policy.order_by(), cursor.as_ref(), page_size)
                .await?;
            let Some(last) = objects.last() else {
                break;
            };
            let next_cursor = policy.sort_key(last);

            let mut existing = HashSet::new();
            for object in &objects {
                if items.get_in_sitemap(sitemap.id, object.object_id()).await?.is_some() {
                    existing.insert(object.object_id());
                }
            }

            let mut tx = items.begin().await?;
            let mut appended = 0;
            for object in &objects {
                if existing.contains(&object.object_id()) || !policy.is_indexable(object) {
                    continue;
                }
                let Some(mut entry) = policy.build_entry(object, sitemap) else {
                    debug!(object_id = object.object_id(), "Permalink is outside the site");
                    continue;
                };
                sitemap.append(&mut entry);
                items.insert_in(&mut tx, &mut entry).await?;
                appended += 1;
            }
            sitemap.set_last_indexed_key(&next_cursor);
            SitemapStore::write(&mut *tx, sitemap).await?;
            tx.commit().await?;

            indexed += appended;
            advance_progress(progress, appended as u64);
            debug!(sitemap_id = sitemap.id, appended, cursor = %next_cursor, "Indexed page");

            if !guard.refresh().await? {
                return Err(Error::LockUnavailable(format!(
                    "lost the lock on {} while indexing",
                    sitemap.description()
                )));
            }

            if objects.len() < page_size {
                break;
            }
            cursor = Some(next_cursor);
        }

        Ok(indexed)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::objects::{AccountPolicy, DocumentPolicy, HostObject, ObjectType, SqliteObjectSource};
    use crate::provider::{ObjectPolicy, Provider};
    use crate::store::{Db, SitemapStatus};
    use crate::testing::{account, document, setup_test_db, test_config};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        db: Db,
        source: SqliteObjectSource,
        config: Config,
        _tmp: TempDir,
    }

    async fn fixture() -> Fixture {
        let (db, tmp) = setup_test_db().await;
        let mut config = test_config(&tmp);
        config.index.page_size = 2;
        config.lock.wait_secs = 0;
        let source = db.object_source();
        Fixture {
            db,
            source,
            config,
            _tmp: tmp,
        }
    }

    fn documents(f: &Fixture) -> Provider<DocumentPolicy> {
        let policy = DocumentPolicy::new(f.config.documents.clone(), f.config.base_url().unwrap());
        Provider::new(policy, Arc::new(f.source.clone()), &f.db, &f.config)
    }

    async fn order(f: &Fixture, sitemap_id: i64) -> Vec<i64> {
        f.db.items(ObjectType::Document)
            .items_from(sitemap_id, 0, 100, false)
            .await
            .unwrap()
            .iter()
            .map(|e| e.object_id)
            .collect()
    }

    #[tokio::test]
    async fn test_index_pages_in_canonical_order() {
        let f = fixture().await;
        for (id, minute) in [(1, 50), (2, 10), (3, 30), (4, 20), (5, 40)] {
            f.source.upsert_document(&document(id, "post", minute)).await.unwrap();
        }
        let mut draft = document(6, "post", 25);
        draft.status = "draft".to_string();
        f.source.upsert_document(&draft).await.unwrap();
        f.source.upsert_document(&document(7, "page", 5)).await.unwrap();

        let provider = documents(&f);
        let reports = provider.index_objects(Some(&["post".to_string()]), false).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].subtype.as_deref(), Some("post"));
        assert_eq!(reports[0].objects_indexed, 5);
        assert!(reports[0].error.is_none());

        let sitemap = f.db.sitemaps()
            .get_by_object_type(ObjectType::Document, Some("post"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![2, 4, 3, 5, 1]);
        assert_eq!(sitemap.status, SitemapStatus::Indexed);
        assert_eq!(sitemap.item_count, 5);
        assert_eq!(sitemap.last_object_id, Some(1));
        assert_eq!(sitemap.last_item_index, Some(4));

        // The page sitemap was not selected
        assert!(f.db.sitemaps()
            .get_by_object_type(ObjectType::Document, Some("page"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_indexed_sitemap_requires_force() {
        let f = fixture().await;
        f.source.upsert_document(&document(1, "post", 1)).await.unwrap();
        let provider = documents(&f);
        provider.index_objects(None, false).await;

        f.source.upsert_document(&document(2, "post", 2)).await.unwrap();
        let reports = provider.index_objects(Some(&["post".to_string()]), false).await;
        assert!(reports[0].error.as_deref().unwrap().contains("already indexed"));

        let reports = provider.index_objects(Some(&["post".to_string()]), true).await;
        assert_eq!(reports[0].objects_indexed, 2);
        let sitemap = f.db.sitemaps()
            .get_by_object_type(ObjectType::Document, Some("post"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![1, 2]);
        assert_eq!(sitemap.item_count, 2);
    }

    #[tokio::test]
    async fn test_interrupted_indexing_resumes_from_cursor() {
        let f = fixture().await;
        for id in 1..=5 {
            f.source.upsert_document(&document(id, "post", id)).await.unwrap();
        }
        let provider = documents(&f);
        provider.index_objects(None, false).await;

        // Pretend the run died after the first page
        let sitemaps = f.db.sitemaps();
        let mut sitemap = sitemaps
            .get_by_object_type(ObjectType::Document, Some("post"))
            .await
            .unwrap()
            .unwrap();
        let items = f.db.items(ObjectType::Document);
        for entry in items.items_from(sitemap.id, 2, 10, false).await.unwrap() {
            sqlx::query("DELETE FROM sitemap_documents WHERE id = ?")
                .bind(entry.id)
                .execute(f.db.pool())
                .await
                .unwrap();
        }
        sitemap.status = SitemapStatus::Indexing;
        sitemap.item_count = 2;
        sitemap.last_object_id = Some(2);
        sitemap.last_item_index = Some(1);
        sitemap.set_last_indexed_key(&document(2, "post", 2).sort_key(provider.policy().order_by()));
        sitemaps.update(&sitemap).await.unwrap();

        let reports = provider.index_objects(Some(&["post".to_string()]), false).await;
        assert_eq!(reports[0].objects_indexed, 3);
        assert_eq!(order(&f, sitemap.id).await, vec![1, 2, 3, 4, 5]);
        assert_eq!(sitemaps.load(sitemap.id).await.unwrap().item_count, 5);
    }

    #[tokio::test]
    async fn test_busy_sitemap_is_reported() {
        let f = fixture().await;
        let provider = documents(&f);
        let sitemap = f.db.sitemaps()
            .get_or_create(ObjectType::Document, Some("post"))
            .await
            .unwrap();
        let _held = provider.sitemap_lock(&sitemap).acquire().await.unwrap().unwrap();

        let reports = provider.index_objects(Some(&["post".to_string()]), false).await;
        assert!(reports[0].error.as_deref().unwrap().starts_with("Could not lock sitemap"));
        assert_eq!(reports[0].objects_indexed, 0);
    }

    #[tokio::test]
    async fn test_account_sitemap_has_no_subtype() {
        let f = fixture().await;
        let mut silent = account(3, "silent", 2);
        silent.published_posts = 0;
        f.source.upsert_account(&account(1, "ada", 5)).await.unwrap();
        f.source.upsert_account(&account(2, "bob", 1)).await.unwrap();
        f.source.upsert_account(&silent).await.unwrap();

        let policy = AccountPolicy::new(f.config.accounts.clone(), f.config.base_url().unwrap());
        let provider = Provider::new(policy, Arc::new(f.source.clone()), &f.db, &f.config);
        let reports = provider.index_objects(None, false).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].subtype, None);
        assert_eq!(reports[0].objects_indexed, 2);

        let sitemap = f.db.sitemaps()
            .get_by_object_type(ObjectType::Account, None)
            .await
            .unwrap()
            .unwrap();
        let objects: Vec<i64> = f.db.items(ObjectType::Account)
            .items_from(sitemap.id, 0, 10, false)
            .await
            .unwrap()
            .iter()
            .map(|e| e.object_id)
            .collect();
        assert_eq!(objects, vec![2, 1]);
    }
}
