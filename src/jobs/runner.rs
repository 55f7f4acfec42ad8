use super::{Job, JobAction, JobStore};
use crate::error::Result;
use crate::store::{Entry, ItemStore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// A claimed batch folded into one set per action.
///
/// Entry sets are keyed by entry id so each entry appears at most once.
#[derive(Debug, Default)]
pub struct DeduplicatedJobs {
    /// Object ids to add
    pub add: BTreeSet<i64>,
    pub remove: BTreeMap<i64, Entry>,
    pub reindex: BTreeMap<i64, Entry>,
    pub update_last_modified: BTreeMap<i64, Entry>,
    pub reindex_sitemap: bool,
}

impl DeduplicatedJobs {
    pub fn is_empty(&self) -> bool {
        !self.reindex_sitemap
            && self.add.is_empty()
            && self.remove.is_empty()
            && self.reindex.is_empty()
            && self.update_last_modified.is_empty()
    }
}

/// Claims, folds and retires one batch of a sitemap's jobs.
///
/// A runner dropped before [`delete_jobs`](Self::delete_jobs) or
/// [`release_claim`](Self::release_claim) hands its jobs back to the queue.
pub struct JobRunner {
    store: JobStore,
    sitemap_id: i64,
    claim_id: String,
    jobs: Vec<Job>,
    finished: bool,
}

impl JobRunner {
    pub fn new(store: JobStore, sitemap_id: i64) -> Self {
        Self {
            store,
            sitemap_id,
            claim_id: Uuid::new_v4().simple().to_string(),
            jobs: Vec::new(),
            finished: true,
        }
    }

    pub fn claim_id(&self) -> &str {
        &self.claim_id
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Claim up to `limit` due jobs; returns how many were claimed
    pub async fn claim_jobs(&mut self, limit: usize) -> Result<usize> {
        self.finished = false;
        self.store.claim_jobs(self.sitemap_id, &self.claim_id, limit).await?;
        self.jobs = self.store.get_by_claim_id(&self.claim_id).await?;
        debug!(
            sitemap_id = self.sitemap_id,
            claim_id = %self.claim_id,
            claimed = self.jobs.len(),
            "Claimed jobs"
        );
        Ok(self.jobs.len())
    }

    /// Fold the claimed jobs, in order, into per-action sets.
    ///
    /// A full reindex supersedes item reindexes and date updates, and a
    /// removal supersedes every other job for the same entry. Jobs whose entry
    /// no longer exists are dropped.
    pub async fn deduplicated_jobs(&self, items: &ItemStore) -> Result<DeduplicatedJobs> {
        let mut folded = DeduplicatedJobs::default();

        for job in &self.jobs {
            match job.action {
                JobAction::ReindexSitemap => {
                    folded.reindex_sitemap = true;
                    folded.reindex.clear();
                    folded.update_last_modified.clear();
                }
                JobAction::AddItem => {
                    if let Some(object_id) = job.object_id {
                        folded.add.insert(object_id);
                    }
                }
                JobAction::RemoveItem => {
                    let Some(entry) = self.resolve_entry(items, job).await? else {
                        continue;
                    };
                    folded.add.remove(&entry.object_id);
                    folded.reindex.remove(&entry.id);
                    folded.update_last_modified.remove(&entry.id);
                    folded.remove.insert(entry.id, entry);
                }
                JobAction::ReindexItem | JobAction::UpdateLastModified => {
                    if folded.reindex_sitemap {
                        continue;
                    }
                    let Some(entry) = self.resolve_entry(items, job).await? else {
                        continue;
                    };
                    if folded.remove.contains_key(&entry.id) {
                        continue;
                    }
                    let set = if job.action == JobAction::ReindexItem {
                        &mut folded.reindex
                    } else {
                        &mut folded.update_last_modified
                    };
                    set.insert(entry.id, entry);
                }
            }
        }

        Ok(folded)
    }

    /// The entry a job refers to, if it still belongs to the job's sitemap
    async fn resolve_entry(&self, items: &ItemStore, job: &Job) -> Result<Option<Entry>> {
        let entry = match (job.sitemap_item_id, job.object_id) {
            (Some(entry_id), _) => items.get(entry_id).await?,
            (None, Some(object_id)) => items.get_in_sitemap(job.sitemap_id, object_id).await?,
            (None, None) => None,
        };
        Ok(entry.filter(|e| e.sitemap_id == job.sitemap_id))
    }

    /// Delete the claimed jobs
    pub async fn delete_jobs(&mut self) -> Result<u64> {
        self.finished = true;
        self.store.delete_claimed(&self.claim_id).await
    }

    /// Hand any still-claimed jobs back to the queue
    pub async fn release_claim(&mut self) -> Result<u64> {
        self.finished = true;
        self.store.release_claim(&self.claim_id).await
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let store = self.store.clone();
        let claim_id = std::mem::take(&mut self.claim_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = store.release_claim(&claim_id).await {
                    warn!(claim_id = %claim_id, error = %e, "Failed to release job claim");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectType, OrderBy};
    use crate::store::{Db, Sitemap};
    use crate::testing::{document, setup_test_db};
    use std::time::Duration;

    async fn sitemap_with_entries(db: &Db, object_ids: &[i64]) -> (Sitemap, Vec<Entry>) {
        let sitemap = db
            .sitemaps()
            .get_or_create(ObjectType::Document, Some("post"))
            .await
            .unwrap();
        let items = db.items(ObjectType::Document);

        let mut entries = Vec::new();
        for (index, &object_id) in object_ids.iter().enumerate() {
            let doc = document(object_id, "post", index as i64);
            let mut entry =
                Entry::for_object(&doc, &sitemap, format!("/post-{}/", object_id), OrderBy::Modified);
            entry.item_index = Some(index as i64);
            items.insert_item(&mut entry).await.unwrap();
            entries.push(entry);
        }
        (sitemap, entries)
    }

    async fn fold(db: &Db, sitemap_id: i64, jobs: &[Job]) -> DeduplicatedJobs {
        for job in jobs {
            db.jobs().insert_job(job).await.unwrap();
        }
        let mut runner = JobRunner::new(db.jobs(), sitemap_id);
        runner.claim_jobs(100).await.unwrap();
        let folded = runner.deduplicated_jobs(&db.items(ObjectType::Document)).await.unwrap();
        runner.delete_jobs().await.unwrap();
        folded
    }

    #[tokio::test]
    async fn test_full_reindex_supersedes_item_jobs() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, entries) = sitemap_with_entries(&db, &[1, 2, 3]).await;

        let folded = fold(
            &db,
            sitemap.id,
            &[
                Job::reindex_item(&entries[0]),
                Job::update_last_modified(&entries[1]),
                Job::reindex_sitemap(sitemap.id),
                Job::reindex_item(&entries[2]),
                Job::add_item(sitemap.id, 9),
            ],
        )
        .await;

        assert!(folded.reindex_sitemap);
        assert!(folded.reindex.is_empty());
        assert!(folded.update_last_modified.is_empty());
        assert_eq!(folded.add.iter().copied().collect::<Vec<_>>(), vec![9]);
    }

    #[tokio::test]
    async fn test_remove_supersedes_other_jobs() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, entries) = sitemap_with_entries(&db, &[1, 2]).await;

        let folded = fold(
            &db,
            sitemap.id,
            &[
                Job::add_item(sitemap.id, 1),
                Job::reindex_item(&entries[0]),
                Job::remove_item(&entries[0]),
                Job::update_last_modified(&entries[0]),
                Job::reindex_item(&entries[1]),
            ],
        )
        .await;

        assert!(folded.add.is_empty());
        assert_eq!(folded.remove.keys().copied().collect::<Vec<_>>(), vec![entries[0].id]);
        assert!(folded.update_last_modified.is_empty());
        assert_eq!(folded.reindex.keys().copied().collect::<Vec<_>>(), vec![entries[1].id]);
    }

    #[tokio::test]
    async fn test_add_after_remove_is_kept() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, entries) = sitemap_with_entries(&db, &[5]).await;

        let folded = fold(
            &db,
            sitemap.id,
            &[Job::remove_item(&entries[0]), Job::add_item(sitemap.id, 5)],
        )
        .await;

        assert!(folded.remove.contains_key(&entries[0].id));
        assert!(folded.add.contains(&5));
    }

    #[tokio::test]
    async fn test_jobs_for_missing_entries_are_skipped() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, entries) = sitemap_with_entries(&db, &[1]).await;

        let mut gone = entries[0].clone();
        gone.id = 999;
        let folded = fold(
            &db,
            sitemap.id,
            &[Job::remove_item(&gone), Job::reindex_item(&gone)],
        )
        .await;

        assert!(folded.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_runner_releases_claim() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, _) = sitemap_with_entries(&db, &[]).await;
        db.jobs().insert_job(&Job::add_item(sitemap.id, 3)).await.unwrap();

        {
            let mut runner = JobRunner::new(db.jobs(), sitemap.id);
            assert_eq!(runner.claim_jobs(10).await.unwrap(), 1);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let jobs = db.jobs().list_for_sitemap(sitemap.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].claim_id.is_none());
    }

    #[tokio::test]
    async fn test_delete_jobs_retires_batch() {
        let (db, _tmp) = setup_test_db().await;
        let (sitemap, _) = sitemap_with_entries(&db, &[]).await;
        db.jobs().insert_job(&Job::add_item(sitemap.id, 3)).await.unwrap();

        let mut runner = JobRunner::new(db.jobs(), sitemap.id);
        runner.claim_jobs(10).await.unwrap();
        tokio_test::assert_ok!(runner.delete_jobs().await);
        assert_eq!(runner.release_claim().await.unwrap(), 0);
        assert!(db.jobs().list_for_sitemap(sitemap.id).await.unwrap().is_empty());
    }
}
