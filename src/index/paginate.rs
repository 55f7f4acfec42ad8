use super::PageOrder;
use crate::config::PaginationConfig;
use crate::error::Result;
use crate::store::{Entry, ItemStore, Sitemap};
use crate::util::absolute_url;
use std::ops::RangeInclusive;
use url::Url;

/// Read access to one sitemap split into fixed-size pages.
///
/// Pages are numbered from 1. In descending order the first page holds the
/// most recently positioned entries.
pub struct Paginator {
    items: ItemStore,
    sitemap: Sitemap,
    base_url: Url,
    page_size: usize,
    order: PageOrder,
}

impl Paginator {
    pub fn new(items: ItemStore, sitemap: Sitemap, base_url: Url, config: &PaginationConfig) -> Self {
        Self {
            items,
            sitemap,
            base_url,
            page_size: config.page_size.max(1),
            order: config.order,
        }
    }

    pub fn sitemap(&self) -> &Sitemap {
        &self.sitemap
    }

    pub fn pages(&self) -> RangeInclusive<usize> {
        let count = self.sitemap.item_count.max(0) as usize;
        1..=count.div_ceil(self.page_size)
    }

    /// Inclusive item index bounds of `page`, or `None` past the last page
    fn bounds(&self, page: usize) -> Option<(i64, i64)> {
        if !self.pages().contains(&page) {
            return None;
        }
        let size = self.page_size as i64;
        let offset = (page as i64 - 1) * size;
        match self.order {
            PageOrder::Ascending => Some((offset, offset + size - 1)),
            PageOrder::Descending => {
                let top = self.sitemap.last_item_index? - offset;
                Some(((top - size + 1).max(0), top))
            }
        }
    }

    pub async fn items(&self, page: usize) -> Result<Vec<Entry>> {
        let Some((low, high)) = self.bounds(page) else {
            return Ok(Vec::new());
        };
        match self.order {
            PageOrder::Ascending => self.items.items_from(self.sitemap.id, low, self.page_size, false).await,
            PageOrder::Descending => self.items.items_from(self.sitemap.id, high, self.page_size, true).await,
        }
    }

    /// Public URL of `page`; the first page carries no number
    pub fn url(&self, page: usize) -> String {
        let suffix = if page > 1 { page.to_string() } else { String::new() };
        absolute_url(
            &self.base_url,
            &format!("/{}-sitemap{}.xml", self.sitemap.name(), suffix),
        )
    }

    pub async fn last_modified(&self, page: usize) -> Result<Option<String>> {
        match self.bounds(page) {
            Some((low, high)) => self.items.max_last_modified(self.sitemap.id, low, high).await,
            None => Ok(None),
        }
    }
}
