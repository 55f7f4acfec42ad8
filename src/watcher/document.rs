use super::Watcher;
use crate::objects::{Document, DocumentPolicy};
use bitflags::bitflags;

bitflags! {
    /// Changes observed on a document
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DocumentEvents: u32 {
        const TYPE_UPDATED      = 1 << 0;
        const MODIFIED_UPDATED  = 1 << 1;
        const STATUS_UPDATED    = 1 << 2;
        const META_UPDATED      = 1 << 3;
        const DELETED           = 1 << 4;
        const PERMALINK_UPDATED = 1 << 5;
        /// Created or saved without a field-level diff
        const SAVED             = 1 << 6;
    }
}

impl Watcher<DocumentEvents> {
    pub fn document_saved(&mut self, document: &Document) {
        self.add_events(document.id, DocumentEvents::SAVED);
    }

    /// Record the fields that differ between two versions of a document
    pub fn document_updated(&mut self, before: &Document, after: &Document) {
        let mut events = DocumentEvents::SAVED;
        if before.kind != after.kind {
            events |= DocumentEvents::TYPE_UPDATED;
        }
        if before.modified != after.modified {
            events |= DocumentEvents::MODIFIED_UPDATED;
        }
        if before.status != after.status {
            events |= DocumentEvents::STATUS_UPDATED;
        }
        if before.permalink != after.permalink {
            events |= DocumentEvents::PERMALINK_UPDATED;
        }
        self.add_events(after.id, events);
    }

    /// Metadata changes matter only for keys the policy declares invalidating
    pub fn document_meta_changed(&mut self, document_id: i64, key: &str, policy: &DocumentPolicy) {
        if policy.is_invalidating_meta_key(key) {
            self.add_events(document_id, DocumentEvents::META_UPDATED);
        }
    }

    pub fn document_deleted(&mut self, document_id: i64) {
        self.add_events(document_id, DocumentEvents::DELETED);
    }
}
