//! Per-object-type sitemap maintenance
//!
//! An [`ObjectPolicy`] answers the questions that differ between documents,
//! accounts and terms: which sitemaps exist, what is indexable, how objects
//! sort and which events invalidate what. [`Provider`] is the generic
//! machinery around a policy: it turns watched events into immediate updates
//! or queued jobs, appends new objects when it can, and runs job batches.

use crate::config::{Config, JobsConfig, LockConfig};
use crate::error::{Error, Result};
use crate::index::{BatchReindex, EntryRefresher, IndexReport, Indexer};
use crate::jobs::{DeduplicatedJobs, Job, JobRunner, JobStore};
use crate::lock::{with_lock, Lock, LockGuard};
use crate::objects::{HostObject, ObjectSource, ObjectType, OrderBy, SortKey};
use crate::store::{Db, Entry, ItemStore, Sitemap, SitemapStatus, SitemapStore};
use crate::util::relative_url;
use crate::watcher::{Invalidations, Watcher};
use async_trait::async_trait;
use bitflags::Flags;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Rules for one object type
pub trait ObjectPolicy: Send + Sync + 'static {
    type Object: HostObject;
    type Events: Flags + Copy + fmt::Debug + Send + Sync + 'static;

    /// Subtypes that get a sitemap; `None` for types without subtypes
    fn subtypes(&self) -> Vec<Option<String>>;

    fn order_by(&self) -> OrderBy;

    /// Site home that entry URLs are relative to
    fn base_url(&self) -> &Url;

    fn is_indexable(&self, object: &Self::Object) -> bool;

    /// Map accumulated events to what they may have invalidated
    fn invalidations(&self, events: Self::Events) -> Invalidations;

    fn sort_key(&self, object: &Self::Object) -> SortKey {
        object.sort_key(self.order_by())
    }

    /// Canonical order of two objects
    fn compare(&self, a: &Self::Object, b: &Self::Object) -> Ordering {
        self.sort_key(a).cmp(&self.sort_key(b))
    }

    fn resolve_url(&self, object: &Self::Object) -> Option<String> {
        relative_url(self.base_url(), object.permalink())
    }

    fn has_sitemap(&self, subtype: Option<&str>) -> bool {
        self.subtypes().iter().any(|s| s.as_deref() == subtype)
    }

    /// A new entry for `object`, or `None` if its URL is outside the site
    fn build_entry(&self, object: &Self::Object, sitemap: &Sitemap) -> Option<Entry> {
        let url = self.resolve_url(object)?;
        Some(Entry::for_object(object, sitemap, url, self.order_by()))
    }
}

/// What [`Provider::add_to_sitemap`] did with an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Written at the end of the sitemap right away
    Appended,
    /// Left to the next job run
    Queued,
    /// Not indexable, already present, or no sitemap for it
    Skipped,
}

/// Outcome of running the jobs of one sitemap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunReport {
    pub sitemap_id: i64,
    pub object_type: ObjectType,
    pub subtype: Option<String>,
    pub jobs_run: usize,
    /// Another process held the sitemap lock
    pub busy: bool,
    pub error: Option<String>,
}

/// Sitemap maintenance for the object type of `P`
pub struct Provider<P: ObjectPolicy> {
    policy: P,
    source: Arc<dyn ObjectSource<P::Object>>,
    db: Db,
    sitemaps: SitemapStore,
    items: ItemStore,
    jobs: JobStore,
    lock_config: LockConfig,
    jobs_config: JobsConfig,
    index_page_size: usize,
}

impl<P: ObjectPolicy> Provider<P> {
    pub fn new(policy: P, source: Arc<dyn ObjectSource<P::Object>>, db: &Db, config: &Config) -> Self {
        Self {
            policy,
            source,
            db: db.clone(),
            sitemaps: db.sitemaps(),
            items: db.items(P::Object::OBJECT_TYPE),
            jobs: db.jobs(),
            lock_config: config.lock.clone(),
            jobs_config: config.jobs.clone(),
            index_page_size: config.index.page_size,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        P::Object::OBJECT_TYPE
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn source(&self) -> &dyn ObjectSource<P::Object> {
        self.source.as_ref()
    }

    pub fn sitemaps(&self) -> &SitemapStore {
        &self.sitemaps
    }

    pub fn items(&self) -> &ItemStore {
        &self.items
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn lock_config(&self) -> &LockConfig {
        &self.lock_config
    }

    pub fn index_page_size(&self) -> usize {
        self.index_page_size
    }

    /// A fresh event accumulator for this object type
    pub fn watcher(&self) -> Watcher<P::Events> {
        Watcher::default()
    }

    /// The lock serializing all work on `sitemap`
    pub fn sitemap_lock(&self, sitemap: &Sitemap) -> Lock {
        Lock::for_sitemap(self.db.pool().clone(), sitemap, &self.lock_config)
    }

    /// The existing sitemap `object` belongs in, if its subtype has one
    pub async fn sitemap_for(&self, object: &P::Object) -> Result<Option<Sitemap>> {
        let subtype = object.subtype();
        if !self.policy.has_sitemap(subtype) {
            return Ok(None);
        }
        self.sitemaps.get_by_object_type(self.object_type(), subtype).await
    }

    /// Indexable and addressable within the site
    fn is_listable(&self, object: &P::Object) -> bool {
        self.policy.is_indexable(object) && self.policy.resolve_url(object).is_some()
    }

    /// A current entry for `object` if it belongs in `sitemap`
    fn fresh_entry(&self, object: &P::Object, sitemap: &Sitemap) -> Option<Entry> {
        if !self.policy.is_indexable(object) || object.subtype() != sitemap.object_subtype.as_deref() {
            return None;
        }
        self.policy.build_entry(object, sitemap)
    }

    // ===== Adding =====

    /// Add a new object, appending right away when it sorts last.
    ///
    /// Falls back to an `add_item` job when the sitemap is busy, not indexed,
    /// or the object belongs somewhere in the middle.
    pub async fn add_to_sitemap(&self, object: &P::Object) -> Result<AddOutcome> {
        let object_id = object.object_id();
        if !self.policy.is_indexable(object) {
            return Ok(AddOutcome::Skipped);
        }
        let Some(sitemap) = self.sitemap_for(object).await? else {
            return Ok(AddOutcome::Skipped);
        };
        if self.items.get_in_sitemap(sitemap.id, object_id).await?.is_some() {
            return Ok(AddOutcome::Skipped);
        }
        let Some(entry) = self.policy.build_entry(object, &sitemap) else {
            debug!(object_type = %self.object_type(), object_id, "Permalink is outside the site");
            return Ok(AddOutcome::Skipped);
        };

        debug!(object_type = %self.object_type(), object_id, sitemap_id = sitemap.id, "Adding to sitemap");

        if !self.jobs_config.force_queue_add {
            let lock = self.sitemap_lock(&sitemap).with_wait(Duration::ZERO);
            let appended = with_lock(&lock, || self.append_to_sitemap(entry, sitemap.id)).await?;
            if appended == Some(true) {
                debug!(object_type = %self.object_type(), object_id, "Appended to sitemap");
                return Ok(AddOutcome::Appended);
            }
        }

        debug!(object_type = %self.object_type(), object_id, "Could not append, queueing add");
        self.jobs.insert_job(&Job::add_item(sitemap.id, object_id)).await?;
        Ok(AddOutcome::Queued)
    }

    /// Write `entry` after the current last entry; `false` if it does not sort
    /// after it or the sitemap is not in a state to grow. Caller holds the lock.
    pub async fn append_to_sitemap(&self, mut entry: Entry, sitemap_id: i64) -> Result<bool> {
        let mut sitemap = self.sitemaps.load(sitemap_id).await?;
        if sitemap.status != SitemapStatus::Indexed {
            debug!(sitemap_id, status = %sitemap.status, "Sitemap is not appendable");
            return Ok(false);
        }

        if let Some(last) = self.items.get_last_item(sitemap_id).await? {
            // A stored key that no longer matches the object is waiting on a job
            let Some(live) = self.source.get(last.object_id).await? else {
                return Ok(false);
            };
            let live_key = self.policy.sort_key(&live);
            if live_key != last.sort_key() || entry.sort_key() <= live_key {
                return Ok(false);
            }
        }

        let mut tx = self.items.begin().await?;
        sitemap.append(&mut entry);
        self.items.insert_in(&mut tx, &mut entry).await?;
        SitemapStore::write(&mut *tx, &sitemap).await?;
        tx.commit().await?;
        Ok(true)
    }

    // ===== Watched events =====

    /// Decide what the combined `events` of one object require
    pub async fn process_watches(&self, object_id: i64, events: P::Events) -> Result<()> {
        let invalidations = self.policy.invalidations(events);
        if invalidations.is_empty() {
            return Ok(());
        }

        let object = self.source.get(object_id).await?;
        let home = match &object {
            Some(object) => self.sitemap_for(object).await?,
            None => None,
        };

        // Entries outside the object's current sitemap are stale
        let mut entry = None;
        for candidate in self.items.find_by_object_id(object_id).await? {
            if home.as_ref().map(|s| s.id) == Some(candidate.sitemap_id) {
                entry = Some(candidate);
            } else {
                debug!(object_type = %self.object_type(), object_id, sitemap_id = candidate.sitemap_id, "Queueing removal from old sitemap");
                self.jobs.insert_job(&Job::remove_item(&candidate)).await?;
            }
        }

        let (Some(object), Some(sitemap)) = (object, home) else {
            return Ok(());
        };
        let listable = self.is_listable(&object);

        let Some(entry) = entry else {
            if listable {
                self.add_to_sitemap(&object).await?;
            }
            return Ok(());
        };

        if invalidations.contains(Invalidations::ITEM_URL) {
            if let Some(url) = self.policy.resolve_url(&object) {
                if url != entry.url {
                    self.items.update_url(entry.id, &url).await?;
                }
            }
        }

        if !listable {
            self.jobs.insert_job(&Job::remove_item(&entry)).await?;
            return Ok(());
        }

        if invalidations.contains(Invalidations::ITEM_INDEX) {
            // The last entry keeps its place; only its date can have moved
            if sitemap.last_object_id == Some(object_id) {
                self.jobs.insert_job(&Job::update_last_modified(&entry)).await?;
            } else {
                self.jobs.insert_job(&Job::reindex_item(&entry)).await?;
            }
        }

        if invalidations.contains(Invalidations::ITEM_LAST_MODIFIED) {
            self.jobs.insert_job(&Job::update_last_modified(&entry)).await?;
        }

        Ok(())
    }

    // ===== Jobs =====

    /// Queue a full reindex of one sitemap
    pub async fn schedule_full_reindex(&self, subtype: Option<&str>) -> Result<bool> {
        let sitemap = self
            .sitemaps
            .get_by_object_type(self.object_type(), subtype)
            .await?
            .ok_or_else(|| Error::UnknownSitemap {
                object_type: self.object_type().to_string(),
                subtype: subtype.map(str::to_string),
            })?;
        info!(sitemap_id = sitemap.id, "Scheduling full reindex of {}", sitemap.description());
        self.jobs.insert_job(&Job::reindex_sitemap(sitemap.id)).await
    }

    /// Run pending jobs for every sitemap of this type, or only `subtypes`.
    ///
    /// Busy sitemaps are skipped, and a failing sitemap does not stop the rest.
    pub async fn run_jobs(&self, subtypes: Option<&[String]>) -> Result<Vec<JobRunReport>> {
        let mut reports = Vec::new();

        for sitemap in self.sitemaps.find_by_object_type(self.object_type()).await? {
            if let Some(subtypes) = subtypes {
                let selected = sitemap
                    .object_subtype
                    .as_ref()
                    .is_some_and(|subtype| subtypes.contains(subtype));
                if !selected {
                    continue;
                }
            }

            let mut report = JobRunReport {
                sitemap_id: sitemap.id,
                object_type: sitemap.object_type,
                subtype: sitemap.object_subtype.clone(),
                jobs_run: 0,
                busy: false,
                error: None,
            };

            match self.run_locked(&sitemap).await {
                Ok(Some(jobs_run)) => {
                    info!(sitemap_id = sitemap.id, jobs_run, "Ran jobs for {}", sitemap.description());
                    report.jobs_run = jobs_run;
                }
                Ok(None) => {
                    info!(sitemap_id = sitemap.id, "Sitemap is busy, skipping job run");
                    report.busy = true;
                }
                Err(e) => {
                    warn!(sitemap_id = sitemap.id, error = %e, "Error while running jobs");
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    /// Run one batch under the sitemap's lock; `None` when it is busy
    async fn run_locked(&self, sitemap: &Sitemap) -> Result<Option<usize>> {
        let lock = self.sitemap_lock(sitemap).with_wait(Duration::ZERO);
        let Some(guard) = lock.acquire().await? else {
            return Ok(None);
        };

        let result = self.run_jobs_for_sitemap(sitemap.id, &guard).await;
        let released = guard.release().await;
        let jobs_run = result?;
        released?;
        Ok(Some(jobs_run))
    }

    /// Claim and apply one batch of a sitemap's jobs while `guard` is held.
    ///
    /// Claimed jobs are deleted whether or not the batch commits.
    pub async fn run_jobs_for_sitemap(&self, sitemap_id: i64, guard: &LockGuard) -> Result<usize> {
        let mut sitemap = self.sitemaps.load(sitemap_id).await?;

        if sitemap.status == SitemapStatus::Updating {
            warn!(sitemap_id, "Sitemap has stale updating status, restoring to indexed");
            sitemap.status = SitemapStatus::Indexed;
            self.sitemaps.set_status(sitemap_id, SitemapStatus::Indexed).await?;
        }
        if sitemap.status != SitemapStatus::Indexed {
            debug!(sitemap_id, status = %sitemap.status, "Sitemap is not indexed, skipping jobs");
            return Ok(0);
        }

        // A claim older than a lease belongs to a runner that lost its lock
        let stale_before = Utc::now() - chrono::Duration::seconds(self.lock_config.max_age_secs as i64);
        for claim_id in self.jobs.stale_claims(sitemap_id, &stale_before).await? {
            let released = self.jobs.release_claim(&claim_id).await?;
            warn!(sitemap_id, claim_id = %claim_id, released, "Released abandoned job claim");
        }

        let mut runner = JobRunner::new(self.jobs.clone(), sitemap_id);
        let claimed = runner.claim_jobs(self.jobs_config.batch_size).await?;
        if claimed == 0 {
            debug!(sitemap_id, "No jobs claimed");
            return Ok(0);
        }

        info!(sitemap_id, claimed, claim_id = %runner.claim_id(), "Running jobs");
        self.keep_lease(guard, sitemap_id).await?;
        sitemap.status = SitemapStatus::Updating;
        self.sitemaps.set_status(sitemap_id, SitemapStatus::Updating).await?;

        let executed = match self.execute_jobs(&runner, &sitemap).await {
            Ok(requeue) => self.keep_lease(guard, sitemap_id).await.map(|()| requeue),
            Err(e) => Err(e),
        };

        let deleted = runner.delete_jobs().await;
        let released = runner.release_claim().await;
        let restored = self.sitemaps.set_status(sitemap_id, SitemapStatus::Indexed).await;

        let requeue = executed?;
        deleted?;
        released?;
        restored?;

        // Removal won this batch; the object gets a fresh entry next run
        for object_id in requeue {
            self.jobs.insert_job(&Job::add_item(sitemap_id, object_id)).await?;
        }

        Ok(claimed)
    }

    async fn keep_lease(&self, guard: &LockGuard, sitemap_id: i64) -> Result<()> {
        if guard.refresh().await? {
            return Ok(());
        }
        Err(Error::LockUnavailable(format!(
            "lost the lock on sitemap {} while running jobs",
            sitemap_id
        )))
    }

    /// Apply the claimed batch; returns object ids whose add must be retried
    async fn execute_jobs(&self, runner: &JobRunner, sitemap: &Sitemap) -> Result<Vec<i64>> {
        let folded = runner.deduplicated_jobs(&self.items).await?;
        let mut batch =
            BatchReindex::new(self.items.clone(), sitemap.clone()).with_page_size(self.index_page_size);
        let mut requeue = Vec::new();

        if !folded.add.is_empty() {
            let object_ids: Vec<i64> = folded.add.iter().copied().collect();
            for object in self.source.get_many(&object_ids).await? {
                let object_id = object.object_id();
                match self.items.get_in_sitemap(sitemap.id, object_id).await? {
                    Some(existing) => {
                        if folded.remove.contains_key(&existing.id) {
                            requeue.push(object_id);
                        }
                    }
                    None => {
                        if let Some(entry) = self.fresh_entry(&object, sitemap) {
                            batch.insert(entry);
                        }
                    }
                }
            }
        }

        for entry in folded.remove.values().cloned() {
            batch.remove(entry);
        }

        if !folded.reindex.is_empty() {
            let reindexed = self
                .refresh_entries(sitemap, folded.reindex.values().cloned().collect())
                .await?;
            let mut refreshed: HashMap<i64, Entry> = reindexed.into_iter().map(|e| (e.id, e)).collect();
            for (id, entry) in folded.reindex.iter() {
                match refreshed.remove(id) {
                    Some(fresh) => batch.insert(fresh),
                    None => batch.remove(entry.clone()),
                }
            }
        }

        if folded.reindex_sitemap {
            info!(sitemap_id = sitemap.id, "Recalculating full sitemap index");
            batch.reindex_all();
        }

        let dated = self.place_dated_entries(&mut batch, &folded, sitemap).await?;

        let committed = batch.commit(self).await?;

        for entry_id in dated {
            self.refresh_last_modified(entry_id, &committed).await?;
        }

        Ok(requeue)
    }

    /// Route date-refresh entries whose sort key moved into the splice.
    ///
    /// Returns the entries left for an in-place refresh after commit. The last
    /// entry moving forward stays in place only when it is the whole batch.
    async fn place_dated_entries(
        &self,
        batch: &mut BatchReindex,
        folded: &DeduplicatedJobs,
        sitemap: &Sitemap,
    ) -> Result<Vec<i64>> {
        let pending: Vec<Entry> = folded
            .update_last_modified
            .values()
            .filter(|entry| !folded.reindex.contains_key(&entry.id))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let stored: HashMap<i64, SortKey> = pending.iter().map(|e| (e.id, e.sort_key())).collect();
        let alone = batch.is_empty() && pending.len() == 1;
        let mut dated = Vec::new();

        for fresh in self.refresh_entries(sitemap, pending).await? {
            let Some(old_key) = stored.get(&fresh.id) else {
                continue;
            };
            let new_key = fresh.sort_key();
            let is_last = fresh.item_index.is_some() && fresh.item_index == sitemap.last_item_index;
            if new_key == *old_key || (alone && is_last && new_key > *old_key) {
                dated.push(fresh.id);
            } else {
                debug!(sitemap_id = sitemap.id, object_id = fresh.object_id, "Sort key moved, reindexing entry");
                batch.insert(fresh);
            }
        }

        Ok(dated)
    }

    /// Refresh an entry's date from its object.
    ///
    /// The last entry also takes the object's new sort key, which can only
    /// have moved forward without changing its place.
    async fn refresh_last_modified(&self, entry_id: i64, sitemap: &Sitemap) -> Result<()> {
        let Some(mut entry) = self.items.get(entry_id).await? else {
            return Ok(());
        };
        let Some(object) = self.source.get(entry.object_id).await? else {
            return Ok(());
        };
        let Some(fresh) = self.policy.build_entry(&object, sitemap) else {
            return Ok(());
        };

        entry.last_modified = fresh.last_modified.clone();
        entry.last_modified_object_id = fresh.last_modified_object_id;
        if entry.item_index.is_some()
            && entry.item_index == sitemap.last_item_index
            && fresh.sort_key() > entry.sort_key()
        {
            entry.sort_value = fresh.sort_value;
            self.items.update_item(&entry).await?;
        } else {
            self.items.update_last_modified(&entry).await?;
        }

        if let Some(last_modified) = &entry.last_modified {
            self.sitemaps.touch_last_modified(sitemap.id, last_modified).await?;
        }
        Ok(())
    }

    // ===== Bulk indexing =====

    /// Populate the sitemaps of `subtypes` (all of this type's when `None`)
    pub async fn index_objects(
        &self,
        subtypes: Option<&[String]>,
        force_recreate: bool,
    ) -> Vec<IndexReport> {
        Indexer::new(self).index(subtypes, force_recreate).await
    }
}

#[async_trait]
impl<P: ObjectPolicy> EntryRefresher for Provider<P> {
    async fn refresh_entries(&self, sitemap: &Sitemap, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let object_ids: Vec<i64> = entries.iter().map(|e| e.object_id).collect();
        let objects: HashMap<i64, P::Object> = self
            .source
            .get_many(&object_ids)
            .await?
            .into_iter()
            .map(|object| (object.object_id(), object))
            .collect();

        Ok(entries
            .into_iter()
            .filter_map(|mut entry| {
                let object = objects.get(&entry.object_id)?;
                let fresh = self.fresh_entry(object, sitemap)?;
                entry.refresh_from(&fresh);
                Some(entry)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobAction;
    use crate::objects::{Document, DocumentPolicy, SqliteObjectSource, TermPolicy};
    use crate::testing::{document, setup_test_db, term, test_config};
    use crate::watcher::{DocumentEvents, TermEvents};
    use tempfile::TempDir;

    struct Fixture {
        db: Db,
        source: SqliteObjectSource,
        provider: Provider<DocumentPolicy>,
        _tmp: TempDir,
    }

    async fn fixture() -> Fixture {
        let (db, tmp) = setup_test_db().await;
        let config = test_config(&tmp);
        let source = db.object_source();
        let policy = DocumentPolicy::new(config.documents.clone(), config.base_url().unwrap());
        let provider = Provider::new(policy, Arc::new(source.clone()), &db, &config);
        Fixture {
            db,
            source,
            provider,
            _tmp: tmp,
        }
    }

    /// An indexed sitemap of posts holding `docs`, in order
    async fn indexed_posts(f: &Fixture, docs: &[Document]) -> Sitemap {
        for doc in docs {
            f.source.upsert_document(doc).await.unwrap();
        }
        let reports = f.provider.index_objects(None, false).await;
        assert!(reports.iter().all(|r| r.error.is_none()), "{:?}", reports);
        f.db.sitemaps()
            .get_by_object_type(ObjectType::Document, Some("post"))
            .await
            .unwrap()
            .unwrap()
    }

    async fn order(f: &Fixture, sitemap_id: i64) -> Vec<i64> {
        f.provider
            .items()
            .items_from(sitemap_id, 0, 1000, false)
            .await
            .unwrap()
            .iter()
            .map(|e| e.object_id)
            .collect()
    }

    async fn run_posts(f: &Fixture) -> JobRunReport {
        let mut reports = f.provider.run_jobs(Some(&["post".to_string()])).await.unwrap();
        assert_eq!(reports.len(), 1);
        reports.remove(0)
    }

    async fn pending(f: &Fixture, sitemap_id: i64) -> Vec<(JobAction, Option<i64>)> {
        f.db.jobs()
            .list_for_sitemap(sitemap_id)
            .await
            .unwrap()
            .into_iter()
            .map(|j| (j.action, j.object_id))
            .collect()
    }

    #[tokio::test]
    async fn test_append_fast_path() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 2)]).await;

        let newest = document(3, "post", 9);
        f.source.upsert_document(&newest).await.unwrap();
        assert_eq!(f.provider.add_to_sitemap(&newest).await.unwrap(), AddOutcome::Appended);
        assert_eq!(f.provider.add_to_sitemap(&newest).await.unwrap(), AddOutcome::Skipped);

        assert_eq!(order(&f, sitemap.id).await, vec![1, 2, 3]);
        let sitemap = f.db.sitemaps().load(sitemap.id).await.unwrap();
        assert_eq!(sitemap.item_count, 3);
        assert_eq!(sitemap.last_object_id, Some(3));
        assert!(pending(&f, sitemap.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_add_is_queued_then_spliced() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 5)]).await;

        let older = document(3, "post", 3);
        f.source.upsert_document(&older).await.unwrap();
        assert_eq!(f.provider.add_to_sitemap(&older).await.unwrap(), AddOutcome::Queued);
        assert_eq!(pending(&f, sitemap.id).await, vec![(JobAction::AddItem, Some(3))]);

        let report = run_posts(&f).await;
        assert_eq!(report.sitemap_id, sitemap.id);
        assert_eq!(report.jobs_run, 1);
        assert_eq!(order(&f, sitemap.id).await, vec![1, 3, 2]);

        let sitemap = f.db.sitemaps().load(sitemap.id).await.unwrap();
        assert_eq!(sitemap.status, SitemapStatus::Indexed);
        assert_eq!(sitemap.item_count, 3);
        assert!(pending(&f, sitemap.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_sitemap_queues_add() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1)]).await;
        let _held = f.provider.sitemap_lock(&sitemap).acquire().await.unwrap().unwrap();

        let newest = document(2, "post", 9);
        f.source.upsert_document(&newest).await.unwrap();
        assert_eq!(f.provider.add_to_sitemap(&newest).await.unwrap(), AddOutcome::Queued);

        let reports = f.provider.run_jobs(None).await.unwrap();
        let report = reports.iter().find(|r| r.sitemap_id == sitemap.id).unwrap();
        assert!(report.busy);
        assert_eq!(pending(&f, sitemap.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unpublished_document_is_removed() {
        let f = fixture().await;
        let before = document(2, "post", 2);
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), before.clone(), document(3, "post", 3)]).await;

        let mut after = before.clone();
        after.status = "draft".to_string();
        f.source.upsert_document(&after).await.unwrap();

        let mut watcher = f.provider.watcher();
        watcher.document_updated(&before, &after);
        assert_eq!(watcher.process_events(&f.provider).await, 1);
        assert_eq!(pending(&f, sitemap.id).await, vec![(JobAction::RemoveItem, Some(2))]);

        f.provider.run_jobs(None).await.unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![1, 3]);
        assert_eq!(f.db.sitemaps().load(sitemap.id).await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_deleted_document_is_removed() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 2)]).await;

        f.source.delete_document(1).await.unwrap();
        f.provider
            .process_watches(1, DocumentEvents::DELETED)
            .await
            .unwrap();
        f.provider.run_jobs(None).await.unwrap();

        assert_eq!(order(&f, sitemap.id).await, vec![2]);
    }

    #[tokio::test]
    async fn test_modified_document_is_reindexed() {
        let f = fixture().await;
        let docs = [document(1, "post", 1), document(2, "post", 2), document(3, "post", 3)];
        let sitemap = indexed_posts(&f, &docs).await;

        let mut touched = docs[0].clone();
        touched.modified = crate::testing::minutes(10);
        f.source.upsert_document(&touched).await.unwrap();

        let mut watcher = f.provider.watcher();
        watcher.document_updated(&docs[0], &touched);
        watcher.process_events(&f.provider).await;
        assert_eq!(pending(&f, sitemap.id).await, vec![(JobAction::ReindexItem, Some(1))]);

        f.provider.run_jobs(None).await.unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![2, 3, 1]);
        let sitemap = f.db.sitemaps().load(sitemap.id).await.unwrap();
        assert_eq!(sitemap.last_object_id, Some(1));
        assert_eq!(sitemap.last_modified, touched.last_modified().as_ref().map(crate::util::format_timestamp));
    }

    #[tokio::test]
    async fn test_modified_last_document_only_refreshes_date() {
        let f = fixture().await;
        let docs = [document(1, "post", 1), document(2, "post", 2)];
        let sitemap = indexed_posts(&f, &docs).await;

        let mut touched = docs[1].clone();
        touched.modified = crate::testing::minutes(30);
        f.source.upsert_document(&touched).await.unwrap();
        f.provider
            .process_watches(2, DocumentEvents::MODIFIED_UPDATED)
            .await
            .unwrap();
        assert_eq!(pending(&f, sitemap.id).await, vec![(JobAction::UpdateLastModified, Some(2))]);

        f.provider.run_jobs(None).await.unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![1, 2]);

        let entry = f.provider.items().get_in_sitemap(sitemap.id, 2).await.unwrap().unwrap();
        assert_eq!(entry.sort_key(), touched.sort_key(OrderBy::Modified));

        // A document modified in between now sorts before the refreshed last one
        let between = document(3, "post", 20);
        f.source.upsert_document(&between).await.unwrap();
        assert_eq!(f.provider.add_to_sitemap(&between).await.unwrap(), AddOutcome::Queued);
    }

    #[tokio::test]
    async fn test_permalink_change_updates_url_immediately() {
        let f = fixture().await;
        let before = document(1, "post", 1);
        let sitemap = indexed_posts(&f, &[before.clone()]).await;

        let mut after = before.clone();
        after.permalink = "https://example.org/2024/renamed/".to_string();
        f.source.upsert_document(&after).await.unwrap();
        f.provider
            .process_watches(1, DocumentEvents::PERMALINK_UPDATED)
            .await
            .unwrap();

        let entry = f.provider.items().get_in_sitemap(sitemap.id, 1).await.unwrap().unwrap();
        assert_eq!(entry.url, "/2024/renamed/");
        assert!(pending(&f, sitemap.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_kind_change_moves_between_sitemaps() {
        let f = fixture().await;
        let before = document(1, "post", 1);
        f.source.upsert_document(&document(2, "page", 1)).await.unwrap();
        let posts = indexed_posts(&f, &[before.clone()]).await;
        let pages = f.db.sitemaps()
            .get_by_object_type(ObjectType::Document, Some("page"))
            .await
            .unwrap()
            .unwrap();

        let mut after = before.clone();
        after.kind = "page".to_string();
        f.source.upsert_document(&after).await.unwrap();

        let mut watcher = f.provider.watcher();
        watcher.document_updated(&before, &after);
        watcher.process_events(&f.provider).await;
        f.provider.run_jobs(None).await.unwrap();

        // Same modification time, so the lower id sorts first
        assert!(order(&f, posts.id).await.is_empty());
        assert_eq!(order(&f, pages.id).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_remove_then_add_requeues_add() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(5, "post", 1)]).await;
        let entry = f.provider.items().get_in_sitemap(sitemap.id, 5).await.unwrap().unwrap();

        f.db.jobs().insert_job(&Job::remove_item(&entry)).await.unwrap();
        f.db.jobs().insert_job(&Job::add_item(sitemap.id, 5)).await.unwrap();
        f.provider.run_jobs(None).await.unwrap();

        assert!(order(&f, sitemap.id).await.is_empty());
        assert_eq!(pending(&f, sitemap.id).await, vec![(JobAction::AddItem, Some(5))]);

        f.provider.run_jobs(None).await.unwrap();
        assert_eq!(order(&f, sitemap.id).await, vec![5]);
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_no_row() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(5, "post", 1)]).await;
        let entry = f.provider.items().get_in_sitemap(sitemap.id, 5).await.unwrap().unwrap();

        f.db.jobs().insert_job(&Job::add_item(sitemap.id, 5)).await.unwrap();
        f.db.jobs().insert_job(&Job::remove_item(&entry)).await.unwrap();
        f.provider.run_jobs(None).await.unwrap();

        assert!(f.provider.items().find_by_object_id(5).await.unwrap().is_empty());
        assert!(pending(&f, sitemap.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_updating_status_is_recovered() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 5)]).await;
        f.db.sitemaps().set_status(sitemap.id, SitemapStatus::Updating).await.unwrap();

        // Left claimed by a runner that died well over a lease ago
        f.source.upsert_document(&document(3, "post", 3)).await.unwrap();
        f.db.jobs().insert_job(&Job::add_item(sitemap.id, 3)).await.unwrap();
        f.db.jobs().claim_jobs(sitemap.id, "crashed", 10).await.unwrap();
        age_claim(&f, "crashed").await;

        assert_eq!(run_posts(&f).await.jobs_run, 1);
        assert_eq!(order(&f, sitemap.id).await, vec![1, 3, 2]);
        assert_eq!(
            f.db.sitemaps().load(sitemap.id).await.unwrap().status,
            SitemapStatus::Indexed
        );
    }

    async fn age_claim(f: &Fixture, claim_id: &str) {
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        sqlx::query("UPDATE sitemap_jobs SET claimed_at = ? WHERE claim_id = ?")
            .bind(crate::util::format_timestamp(&long_ago))
            .bind(claim_id)
            .execute(f.db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_claim_is_left_alone() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 5)]).await;

        // Claimed moments ago by a runner still at work
        f.source.upsert_document(&document(3, "post", 3)).await.unwrap();
        f.db.jobs().insert_job(&Job::add_item(sitemap.id, 3)).await.unwrap();
        f.db.jobs().claim_jobs(sitemap.id, "working", 10).await.unwrap();

        assert_eq!(run_posts(&f).await.jobs_run, 0);
        assert_eq!(order(&f, sitemap.id).await, vec![1, 2]);
        let jobs = f.db.jobs().list_for_sitemap(sitemap.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].claim_id.as_deref(), Some("working"));
    }

    #[tokio::test]
    async fn test_lost_lease_aborts_job_run() {
        let f = fixture().await;
        let sitemap = indexed_posts(&f, &[document(1, "post", 1), document(2, "post", 5)]).await;
        f.source.upsert_document(&document(3, "post", 3)).await.unwrap();
        f.db.jobs().insert_job(&Job::add_item(sitemap.id, 3)).await.unwrap();

        let guard = f.provider.sitemap_lock(&sitemap).acquire().await.unwrap().unwrap();
        // Reaped by another process
        sqlx::query("DELETE FROM locks").execute(f.db.pool()).await.unwrap();

        let result = f.provider.run_jobs_for_sitemap(sitemap.id, &guard).await;
        assert!(matches!(result, Err(Error::LockUnavailable(_))));
        assert_eq!(order(&f, sitemap.id).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_append_checks_live_last_object() {
        let f = fixture().await;
        let docs = [document(1, "post", 1), document(2, "post", 2)];
        let sitemap = indexed_posts(&f, &docs).await;

        let mut touched = docs[1].clone();
        touched.modified = crate::testing::minutes(30);
        f.source.upsert_document(&touched).await.unwrap();
        f.provider
            .process_watches(2, DocumentEvents::MODIFIED_UPDATED)
            .await
            .unwrap();

        // Sorts after the stored key of doc 2 but before its live one
        let between = document(3, "post", 20);
        f.source.upsert_document(&between).await.unwrap();
        assert_eq!(f.provider.add_to_sitemap(&between).await.unwrap(), AddOutcome::Queued);

        run_posts(&f).await;
        assert_eq!(order(&f, sitemap.id).await, vec![1, 3, 2]);
        let sitemap = f.db.sitemaps().load(sitemap.id).await.unwrap();
        assert_eq!(sitemap.last_object_id, Some(2));
        assert!(pending(&f, sitemap.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_reindex_job() {
        let f = fixture().await;
        let docs: Vec<Document> = (1..=5).map(|id| document(id, "post", id)).collect();
        let sitemap = indexed_posts(&f, &docs).await;

        f.source.delete_document(2).await.unwrap();
        let mut moved = docs[0].clone();
        moved.modified = crate::testing::minutes(100);
        f.source.upsert_document(&moved).await.unwrap();

        assert!(f.provider.schedule_full_reindex(Some("post")).await.unwrap());
        assert!(!f.provider.schedule_full_reindex(Some("post")).await.unwrap());
        f.provider.run_jobs(Some(&["post".to_string()])).await.unwrap();

        assert_eq!(order(&f, sitemap.id).await, vec![3, 4, 5, 1]);
        assert!(matches!(
            f.provider.schedule_full_reindex(Some("attachment")).await,
            Err(Error::UnknownSitemap { .. })
        ));
    }

    #[tokio::test]
    async fn test_term_count_refreshes_last_modified() {
        let (db, tmp) = setup_test_db().await;
        let config = test_config(&tmp);
        let source = db.object_source();
        let policy = TermPolicy::new(config.terms.clone(), config.base_url().unwrap());
        let provider = Provider::new(policy, Arc::new(source.clone()), &db, &config);

        let mut news = term(10, 1, "category", 2);
        source.upsert_term(&news).await.unwrap();
        source.upsert_term(&term(11, 2, "category", 1)).await.unwrap();
        provider.index_objects(Some(&["category".to_string()]), false).await;

        news.count = 3;
        news.last_modified = Some(crate::testing::minutes(42));
        news.last_modified_object_id = Some(77);
        source.upsert_term(&news).await.unwrap();
        provider.process_watches(10, TermEvents::COUNT_UPDATED).await.unwrap();
        provider.run_jobs(None).await.unwrap();

        let entry = provider.items().get_one_by_object_id(10).await.unwrap().unwrap();
        assert_eq!(entry.last_modified_object_id, Some(77));
        let sitemap = db.sitemaps().load(entry.sitemap_id).await.unwrap();
        assert_eq!(sitemap.last_modified, entry.last_modified);
        assert_eq!(sitemap.item_count, 2);
    }
}
