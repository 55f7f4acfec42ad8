//! The sitemap engine as one handle: a provider per object type plus the
//! per-execution watchers that feed them.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{IndexReport, Indexer, Paginator};
use crate::jobs::PendingJobs;
use crate::objects::{
    Account, AccountPolicy, Document, DocumentPolicy, ObjectSource, ObjectType, Term, TermPolicy,
};
use crate::provider::{JobRunReport, Provider};
use crate::store::{Db, Sitemap};
use crate::watcher::{AccountEvents, DocumentEvents, TermEvents, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Event accumulators for one host execution
#[derive(Debug, Default)]
pub struct Watchers {
    pub documents: Watcher<DocumentEvents>,
    pub accounts: Watcher<AccountEvents>,
    pub terms: Watcher<TermEvents>,
}

impl Watchers {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.accounts.is_empty() && self.terms.is_empty()
    }
}

/// One sitemap with its queue depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapSummary {
    #[serde(flatten)]
    pub sitemap: Sitemap,
    pub pending_jobs: i64,
    pub claimed_jobs: i64,
}

/// Page listing of one sitemap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: usize,
    pub url: String,
    pub last_modified: Option<String>,
}

pub struct Sitemaps {
    config: Config,
    db: Db,
    documents: Provider<DocumentPolicy>,
    accounts: Provider<AccountPolicy>,
    terms: Provider<TermPolicy>,
}

impl Sitemaps {
    /// Open the configured database; it must have been initialized
    pub async fn open(config: Config) -> Result<Self> {
        let db = Db::connect(&config).await?;
        if !db.is_initialized().await? {
            return Err(Error::NotInitialized);
        }
        Self::new(db, config)
    }

    /// Engine reading host objects from the mirror tables of `db`
    pub fn new(db: Db, config: Config) -> Result<Self> {
        let source = Arc::new(db.object_source());
        Self::with_sources(db, config, source.clone(), source.clone(), source)
    }

    /// Engine reading host objects from custom sources
    pub fn with_sources(
        db: Db,
        config: Config,
        documents: Arc<dyn ObjectSource<Document>>,
        accounts: Arc<dyn ObjectSource<Account>>,
        terms: Arc<dyn ObjectSource<Term>>,
    ) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;

        let documents = Provider::new(
            DocumentPolicy::new(config.documents.clone(), base_url.clone()),
            documents,
            &db,
            &config,
        );
        let accounts = Provider::new(
            AccountPolicy::new(config.accounts.clone(), base_url.clone()),
            accounts,
            &db,
            &config,
        );
        let terms = Provider::new(
            TermPolicy::new(config.terms.clone(), base_url),
            terms,
            &db,
            &config,
        );

        Ok(Self {
            config,
            db,
            documents,
            accounts,
            terms,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn documents(&self) -> &Provider<DocumentPolicy> {
        &self.documents
    }

    pub fn accounts(&self) -> &Provider<AccountPolicy> {
        &self.accounts
    }

    pub fn terms(&self) -> &Provider<TermPolicy> {
        &self.terms
    }

    pub fn watchers(&self) -> Watchers {
        Watchers::default()
    }

    /// End-of-execution hook: evaluate everything the watchers collected
    pub async fn flush(&self, watchers: Watchers) -> usize {
        if watchers.is_empty() {
            return 0;
        }
        let (documents, accounts, terms) = tokio::join!(
            watchers.documents.process_events(&self.documents),
            watchers.accounts.process_events(&self.accounts),
            watchers.terms.process_events(&self.terms),
        );
        let processed = documents + accounts + terms;
        debug!(processed, "Flushed watched events");
        processed
    }

    /// Bulk index the sitemaps of one object type, or of all types
    pub async fn index_objects(
        &self,
        object_type: Option<ObjectType>,
        subtypes: Option<&[String]>,
        force_recreate: bool,
        show_progress: bool,
    ) -> Vec<IndexReport> {
        let mut reports = Vec::new();
        for object_type in selected_types(object_type) {
            let batch = match object_type {
                ObjectType::Document => {
                    Indexer::new(&self.documents)
                        .with_progress(show_progress)
                        .index(subtypes, force_recreate)
                        .await
                }
                ObjectType::Account => {
                    Indexer::new(&self.accounts)
                        .with_progress(show_progress)
                        .index(subtypes, force_recreate)
                        .await
                }
                ObjectType::Term => {
                    Indexer::new(&self.terms)
                        .with_progress(show_progress)
                        .index(subtypes, force_recreate)
                        .await
                }
            };
            reports.extend(batch);
        }
        reports
    }

    /// Run pending jobs; object types run side by side since their sitemaps are independent
    pub async fn run_jobs(
        &self,
        object_type: Option<ObjectType>,
        subtypes: Option<&[String]>,
    ) -> Result<Vec<JobRunReport>> {
        let wanted = selected_types(object_type);
        let run = |object_type: ObjectType| wanted.contains(&object_type);

        let (documents, accounts, terms) = tokio::try_join!(
            async {
                if run(ObjectType::Document) {
                    self.documents.run_jobs(subtypes).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if run(ObjectType::Account) {
                    self.accounts.run_jobs(subtypes).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if run(ObjectType::Term) {
                    self.terms.run_jobs(subtypes).await
                } else {
                    Ok(Vec::new())
                }
            },
        )?;

        let reports: Vec<JobRunReport> = documents.into_iter().chain(accounts).chain(terms).collect();
        let jobs_run: usize = reports.iter().map(|r| r.jobs_run).sum();
        info!(sitemaps = reports.len(), jobs_run, "Job run finished");
        Ok(reports)
    }

    pub async fn schedule_full_reindex(&self, object_type: ObjectType, subtype: Option<&str>) -> Result<bool> {
        match object_type {
            ObjectType::Document => self.documents.schedule_full_reindex(subtype).await,
            ObjectType::Account => self.accounts.schedule_full_reindex(subtype).await,
            ObjectType::Term => self.terms.schedule_full_reindex(subtype).await,
        }
    }

    /// Every sitemap with its pending and claimed job counts
    pub async fn status(&self) -> Result<Vec<SitemapSummary>> {
        let sitemaps = self.db.sitemaps().get_all().await?;
        let counts: HashMap<i64, PendingJobs> = self
            .db
            .jobs()
            .pending_by_sitemap()
            .await?
            .into_iter()
            .map(|c| (c.sitemap_id, c))
            .collect();

        Ok(sitemaps
            .into_iter()
            .map(|sitemap| {
                let count = counts.get(&sitemap.id);
                SitemapSummary {
                    pending_jobs: count.map_or(0, |c| c.pending),
                    claimed_jobs: count.map_or(0, |c| c.claimed),
                    sitemap,
                }
            })
            .collect())
    }

    /// Sitemaps ready to be served
    pub async fn viewable(&self) -> Result<Vec<Sitemap>> {
        self.db.sitemaps().viewable().await
    }

    pub fn paginate(&self, sitemap: Sitemap) -> Result<Paginator> {
        Ok(Paginator::new(
            self.db.items(sitemap.object_type),
            sitemap,
            self.config.base_url()?,
            &self.config.pagination,
        ))
    }

    /// Page URLs and dates of the sitemap for a type and subtype
    pub async fn pages(&self, object_type: ObjectType, subtype: Option<&str>) -> Result<Vec<PageSummary>> {
        let sitemap = self
            .db
            .sitemaps()
            .get_by_object_type(object_type, subtype)
            .await?
            .ok_or_else(|| Error::UnknownSitemap {
                object_type: object_type.to_string(),
                subtype: subtype.map(str::to_string),
            })?;

        let paginator = self.paginate(sitemap)?;
        let mut pages = Vec::new();
        for page in paginator.pages() {
            pages.push(PageSummary {
                page,
                url: paginator.url(page),
                last_modified: paginator.last_modified(page).await?,
            });
        }
        Ok(pages)
    }
}

fn selected_types(object_type: Option<ObjectType>) -> Vec<ObjectType> {
    match object_type {
        Some(object_type) => vec![object_type],
        None => ObjectType::ALL.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::SqliteObjectSource;
    use crate::store::SitemapStatus;
    use crate::testing::{account, document, setup_test_db, term, test_config};
    use tempfile::TempDir;

    async fn engine() -> (Sitemaps, SqliteObjectSource, TempDir) {
        let (db, tmp) = setup_test_db().await;
        let mut config = test_config(&tmp);
        config.pagination.page_size = 2;
        let source = db.object_source();
        (Sitemaps::new(db, config).unwrap(), source, tmp)
    }

    #[tokio::test]
    async fn test_open_requires_init() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        assert!(matches!(Sitemaps::open(config).await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_index_everything_and_list_pages() {
        let (engine, source, _tmp) = engine().await;
        for id in 1..=3 {
            source.upsert_document(&document(id, "post", id)).await.unwrap();
        }
        source.upsert_account(&account(1, "ada", 0)).await.unwrap();
        source.upsert_term(&term(10, 1, "category", 4)).await.unwrap();

        let reports = engine.index_objects(None, None, false, false).await;
        // post, page, accounts, category, post_tag
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|r| r.error.is_none()));
        assert_eq!(reports.iter().map(|r| r.objects_indexed).sum::<usize>(), 5);

        let viewable = engine.viewable().await.unwrap();
        assert_eq!(viewable.len(), 3);
        assert!(viewable.iter().all(|s| s.status == SitemapStatus::Indexed));

        let pages = engine.pages(ObjectType::Document, Some("post")).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "https://example.org/post-sitemap.xml");
        assert_eq!(pages[1].url, "https://example.org/post-sitemap2.xml");
        assert!(pages[1].last_modified > pages[0].last_modified);

        assert!(matches!(
            engine.pages(ObjectType::Document, Some("attachment")).await,
            Err(Error::UnknownSitemap { .. })
        ));
    }

    #[tokio::test]
    async fn test_flush_then_run_jobs() {
        let (engine, source, _tmp) = engine().await;
        let first = document(1, "post", 5);
        source.upsert_document(&first).await.unwrap();
        engine.index_objects(Some(ObjectType::Document), None, false, false).await;

        // An older document shows up, then the first one is trashed
        let older = document(2, "post", 1);
        source.upsert_document(&older).await.unwrap();
        let mut trashed = first.clone();
        trashed.status = "trash".to_string();
        source.upsert_document(&trashed).await.unwrap();

        let mut watchers = engine.watchers();
        watchers.documents.document_saved(&older);
        watchers.documents.document_updated(&first, &trashed);
        watchers.accounts.authored_document_updated(None, &older);
        assert_eq!(engine.flush(watchers).await, 3);

        let status = engine.status().await.unwrap();
        let posts = status
            .iter()
            .find(|s| s.sitemap.object_subtype.as_deref() == Some("post"))
            .unwrap();
        assert_eq!(posts.pending_jobs, 2);

        let reports = engine.run_jobs(None, None).await.unwrap();
        assert_eq!(reports.iter().map(|r| r.jobs_run).sum::<usize>(), 2);

        let items = engine.db().items(ObjectType::Document);
        let posts = engine
            .db()
            .sitemaps()
            .get_by_object_type(ObjectType::Document, Some("post"))
            .await
            .unwrap()
            .unwrap();
        let entries = items.items_from(posts.id, 0, 10, false).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.object_id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(posts.item_count, 1);
    }

    #[tokio::test]
    async fn test_schedule_full_reindex_routes_by_type() {
        let (engine, source, _tmp) = engine().await;
        source.upsert_term(&term(10, 1, "category", 4)).await.unwrap();
        engine.index_objects(Some(ObjectType::Term), None, false, false).await;

        assert!(engine
            .schedule_full_reindex(ObjectType::Term, Some("category"))
            .await
            .unwrap());
        assert!(engine.schedule_full_reindex(ObjectType::Account, None).await.is_err());
    }
}
