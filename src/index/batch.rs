use crate::error::Result;
use crate::store::{Entry, ItemStore, Sitemap, SitemapStore};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Entries refreshed per page during a full reindex
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Rebuilds entries from the objects they point at
#[async_trait]
pub trait EntryRefresher: Send + Sync {
    /// Refresh the object-derived columns of `entries`.
    ///
    /// Entries whose object is gone or no longer belongs in `sitemap` are left
    /// out of the result.
    async fn refresh_entries(&self, sitemap: &Sitemap, entries: Vec<Entry>) -> Result<Vec<Entry>>;
}

/// A set of inserts and removals applied to one sitemap in a single pass.
///
/// Without a full reindex the existing order is spliced: surviving rows are
/// shifted window by window and inserted rows fill the gaps. With a full
/// reindex every row is refreshed and ranked again.
///
/// `commit` runs in one transaction. Until it commits, readers keep seeing
/// the previous positions.
pub struct BatchReindex {
    items: ItemStore,
    sitemap: Sitemap,
    inserts: Vec<Entry>,
    removes: Vec<Entry>,
    full_reindex: bool,
    page_size: usize,
}

impl BatchReindex {
    pub fn new(items: ItemStore, sitemap: Sitemap) -> Self {
        Self {
            items,
            sitemap,
            inserts: Vec::new(),
            removes: Vec::new(),
            full_reindex: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Place `entry` at its canonical position.
    ///
    /// An entry that already has a row is moved: its old position is removed
    /// and its (refreshed) sort key decides the new one.
    pub fn insert(&mut self, entry: Entry) {
        if entry.exists() {
            self.removes.push(entry.clone());
        }
        self.inserts.push(entry);
    }

    pub fn remove(&mut self, entry: Entry) {
        self.removes.push(entry);
    }

    /// Rank every entry again instead of splicing
    pub fn reindex_all(&mut self) {
        self.full_reindex = true;
    }

    pub fn is_empty(&self) -> bool {
        !self.full_reindex && self.inserts.is_empty() && self.removes.is_empty()
    }

    /// Apply the batch and return the sitemap with recomputed counters
    pub async fn commit<R>(self, refresher: &R) -> Result<Sitemap>
    where
        R: EntryRefresher + ?Sized,
    {
        if self.is_empty() {
            return Ok(self.sitemap);
        }

        let sitemap_id = self.sitemap.id;
        let mut tx = self.items.begin().await?;

        if self.full_reindex {
            self.rebuild(&mut tx, refresher).await?;
        } else {
            self.splice(&mut tx).await?;
        }

        self.items.commit_next_index(&mut tx, sitemap_id).await?;
        let deleted = self.items.delete_unindexed(&mut tx, sitemap_id).await?;

        let mut sitemap = self.sitemap.clone();
        self.recount(&mut tx, &mut sitemap).await?;
        SitemapStore::write(&mut *tx, &sitemap).await?;

        tx.commit().await?;

        info!(
            sitemap_id,
            inserted = self.inserts.len(),
            removed = self.removes.len(),
            deleted,
            full_reindex = self.full_reindex,
            item_count = sitemap.item_count,
            "Committed sitemap batch"
        );
        Ok(sitemap)
    }

    /// Shift surviving rows around the removed and inserted positions
    async fn splice(&self, conn: &mut SqliteConnection) -> Result<()> {
        let sitemap_id = self.sitemap.id;
        let old_end = self.items.index_end(conn, sitemap_id).await?;
        self.items.seed_next_index(conn, sitemap_id).await?;

        // Net size change at each committed position
        let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();

        let mut removed = HashSet::new();
        for entry in &self.removes {
            if !entry.exists() || !removed.insert(entry.id) {
                continue;
            }
            self.items.set_next_index(conn, entry.id, None).await?;
            if let Some(index) = entry.item_index {
                *deltas.entry(index).or_default() -= 1;
            }
        }

        let mut inserts: Vec<&Entry> = self.inserts.iter().collect();
        inserts.sort_by_key(|entry| entry.sort_key());

        // Target: the position of the first surviving row sorting after the entry
        let mut targets = Vec::with_capacity(inserts.len());
        for entry in &inserts {
            let target = self
                .items
                .next_index_after(conn, sitemap_id, &entry.sort_key())
                .await?
                .unwrap_or(old_end);
            *deltas.entry(target).or_default() += 1;
            targets.push(target);
        }

        // Rows at or after a breakpoint move by the running total; equal
        // neighbouring offsets share one window
        let mut windows: Vec<(i64, i64)> = Vec::new();
        let mut running = 0;
        for (&index, &delta) in &deltas {
            running += delta;
            let current = windows.last().map(|&(_, offset)| offset).unwrap_or(0);
            if running != current {
                windows.push((index, running));
            }
        }

        for (i, &(from, offset)) in windows.iter().enumerate() {
            if offset == 0 {
                continue;
            }
            let to = windows.get(i + 1).map(|&(next, _)| next - 1);
            let moved = self
                .items
                .shift_next_index(conn, sitemap_id, offset, from, to)
                .await?;
            debug!(sitemap_id, from, ?to, offset, moved, "Shifted window");
        }

        // Inserts sharing a target are already in canonical order
        let mut previous: Option<(i64, i64)> = None;
        for (entry, target) in inserts.into_iter().zip(targets) {
            let position = match previous {
                Some((last_target, next)) if last_target == target => next,
                _ => target + deltas.range(..target).map(|(_, delta)| delta).sum::<i64>(),
            };
            previous = Some((target, position + 1));

            let mut entry = entry.clone();
            entry.next_item_index = Some(position);
            if entry.exists() {
                self.items.update_in(conn, &entry).await?;
            } else {
                entry.item_index = None;
                self.items.insert_in(conn, &mut entry).await?;
            }
        }

        Ok(())
    }

    /// Refresh every row from its object and rank the survivors
    async fn rebuild<R>(&self, conn: &mut SqliteConnection, refresher: &R) -> Result<()>
    where
        R: EntryRefresher + ?Sized,
    {
        let sitemap_id = self.sitemap.id;

        for entry in self.inserts.iter().filter(|e| !e.exists()) {
            let mut entry = entry.clone();
            entry.item_index = None;
            entry.next_item_index = None;
            self.items.insert_in(conn, &mut entry).await?;
        }

        self.items.clear_next_index(conn, sitemap_id).await?;

        let removed: HashSet<i64> = self.removes.iter().map(|e| e.id).collect();
        let mut after_id = 0;
        let mut kept = 0usize;
        loop {
            let page = self
                .items
                .list_in(conn, sitemap_id, after_id, self.page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            let page: Vec<Entry> = page.into_iter().filter(|e| !removed.contains(&e.id)).collect();
            // A non-null scratch value marks the row as surviving; ranking
            // replaces it with the real position
            for mut entry in refresher.refresh_entries(&self.sitemap, page).await? {
                entry.next_item_index = Some(0);
                self.items.update_in(conn, &entry).await?;
                kept += 1;
            }
        }

        let ranked = self.items.rank_next_index(conn, sitemap_id).await?;
        debug!(sitemap_id, kept, ranked, "Ranked sitemap entries");
        Ok(())
    }

    /// Counters follow the highest remaining position
    async fn recount(&self, conn: &mut SqliteConnection, sitemap: &mut Sitemap) -> Result<()> {
        match self.items.last_item_in(conn, sitemap.id).await? {
            Some(last) => {
                sitemap.item_count = last.item_index.map_or(0, |index| index + 1);
                sitemap.last_object_id = Some(last.object_id);
                sitemap.last_item_index = last.item_index;
            }
            None => {
                sitemap.item_count = 0;
                sitemap.last_object_id = None;
                sitemap.last_item_index = None;
            }
        }
        sitemap.last_modified = self.items.max_last_modified_in(conn, sitemap.id).await?;
        Ok(())
    }
}
