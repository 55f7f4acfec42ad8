use super::{HostObject, ObjectType, OrderBy, SortKey};
use crate::config::DocumentsConfig;
use crate::provider::ObjectPolicy;
use crate::watcher::{DocumentEvents, Invalidations};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A document (post, page, or any other kind)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub kind: String,
    pub status: String,
    pub author_id: Option<i64>,
    pub modified: DateTime<Utc>,
    pub permalink: String,
}

impl HostObject for Document {
    const OBJECT_TYPE: ObjectType = ObjectType::Document;

    fn object_id(&self) -> i64 {
        self.id
    }

    fn subtype(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn permalink(&self) -> &str {
        &self.permalink
    }

    fn sort_key(&self, order_by: OrderBy) -> SortKey {
        match order_by {
            OrderBy::Modified => SortKey::timestamp(&self.modified, self.id),
            _ => SortKey::integer(self.id, self.id),
        }
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        Some(self.modified)
    }
}

/// Default document rules: listed kinds with an indexable status
#[derive(Debug, Clone)]
pub struct DocumentPolicy {
    config: DocumentsConfig,
    base_url: Url,
}

impl DocumentPolicy {
    pub fn new(config: DocumentsConfig, base_url: Url) -> Self {
        Self { config, base_url }
    }

    /// Whether a metadata key can change indexability
    pub fn is_invalidating_meta_key(&self, key: &str) -> bool {
        self.config.invalidating_meta_keys.iter().any(|k| k == key)
    }
}

impl ObjectPolicy for DocumentPolicy {
    type Object = Document;
    type Events = DocumentEvents;

    fn subtypes(&self) -> Vec<Option<String>> {
        self.config.kinds.iter().cloned().map(Some).collect()
    }

    fn order_by(&self) -> OrderBy {
        self.config.order_by
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn is_indexable(&self, document: &Document) -> bool {
        self.config.kinds.contains(&document.kind)
            && self.config.indexable_statuses.contains(&document.status)
    }

    fn invalidations(&self, events: DocumentEvents) -> Invalidations {
        // A deleted document only needs its existence checked
        if events.contains(DocumentEvents::DELETED) {
            return Invalidations::OBJECT_EXISTS;
        }

        let mut invalidations = Invalidations::empty();
        if events.intersects(
            DocumentEvents::TYPE_UPDATED
                | DocumentEvents::STATUS_UPDATED
                | DocumentEvents::SAVED
                | DocumentEvents::META_UPDATED,
        ) {
            invalidations |= Invalidations::IS_INDEXABLE;
        }
        if events.contains(DocumentEvents::PERMALINK_UPDATED) {
            invalidations |= Invalidations::ITEM_URL;
        }
        if events.contains(DocumentEvents::MODIFIED_UPDATED) {
            invalidations |= match self.config.order_by {
                OrderBy::Modified => Invalidations::ITEM_INDEX,
                _ => Invalidations::ITEM_LAST_MODIFIED,
            };
        }
        invalidations
    }
}
