use super::{HostObject, ObjectType, OrderBy, SortKey};
use crate::config::TermsConfig;
use crate::provider::ObjectPolicy;
use crate::watcher::{Invalidations, TermEvents};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A taxonomy term.
///
/// Terms are identified by their term-taxonomy id. Their modification date is
/// derived by the host from the most recently modified document attached to
/// the term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub term_taxonomy_id: i64,
    pub term_id: i64,
    pub taxonomy: String,
    pub count: i64,
    pub permalink: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_modified_object_id: Option<i64>,
}

impl HostObject for Term {
    const OBJECT_TYPE: ObjectType = ObjectType::Term;

    fn object_id(&self) -> i64 {
        self.term_taxonomy_id
    }

    fn subtype(&self) -> Option<&str> {
        Some(&self.taxonomy)
    }

    fn permalink(&self) -> &str {
        &self.permalink
    }

    fn sort_key(&self, order_by: OrderBy) -> SortKey {
        match order_by {
            OrderBy::TermId => SortKey::integer(self.term_id, self.term_taxonomy_id),
            _ => SortKey::integer(self.term_taxonomy_id, self.term_taxonomy_id),
        }
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    fn last_modified_object_id(&self) -> Option<i64> {
        self.last_modified_object_id
    }
}

#[derive(Debug, Clone)]
pub struct TermPolicy {
    config: TermsConfig,
    base_url: Url,
}

impl TermPolicy {
    pub fn new(config: TermsConfig, base_url: Url) -> Self {
        Self { config, base_url }
    }
}

impl ObjectPolicy for TermPolicy {
    type Object = Term;
    type Events = TermEvents;

    fn subtypes(&self) -> Vec<Option<String>> {
        self.config.taxonomies.iter().cloned().map(Some).collect()
    }

    fn order_by(&self) -> OrderBy {
        self.config.order_by
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn is_indexable(&self, term: &Term) -> bool {
        self.config.taxonomies.contains(&term.taxonomy) && (!self.config.hide_empty || term.count > 0)
    }

    fn invalidations(&self, events: TermEvents) -> Invalidations {
        if events.contains(TermEvents::DELETED) {
            return Invalidations::OBJECT_EXISTS;
        }

        let mut invalidations = Invalidations::empty();
        if events.contains(TermEvents::SAVED) {
            invalidations |= Invalidations::IS_INDEXABLE;
        }
        if events.contains(TermEvents::LINK_UPDATED) {
            invalidations |= Invalidations::ITEM_URL;
        }
        // Document counts move whenever documents are (un)assigned, which is
        // also what changes the derived modification date.
        if events.contains(TermEvents::COUNT_UPDATED) {
            invalidations |= Invalidations::IS_INDEXABLE | Invalidations::ITEM_LAST_MODIFIED;
        }
        invalidations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::term;

    fn policy(hide_empty: bool) -> TermPolicy {
        TermPolicy::new(
            TermsConfig {
                hide_empty,
                ..TermsConfig::default()
            },
            Url::parse("https://example.org/").unwrap(),
        )
    }

    #[test]
    fn test_empty_terms() {
        let mut t = term(12, 4, "category", 0);
        assert!(policy(false).is_indexable(&t));
        assert!(!policy(true).is_indexable(&t));

        t.count = 3;
        assert!(policy(true).is_indexable(&t));
    }

    #[test]
    fn test_count_refreshes_last_modified() {
        let invalidations = policy(true).invalidations(TermEvents::COUNT_UPDATED);
        assert!(invalidations.contains(Invalidations::ITEM_LAST_MODIFIED));
        assert!(invalidations.contains(Invalidations::IS_INDEXABLE));
        assert_eq!(
            policy(true).invalidations(TermEvents::DELETED | TermEvents::SAVED),
            Invalidations::OBJECT_EXISTS
        );
    }

    #[test]
    fn test_terms_sort_by_term_id_then_taxonomy_id() {
        let a = term(30, 2, "category", 1);
        let b = term(10, 5, "category", 1);
        assert!(a.sort_key(OrderBy::TermId) < b.sort_key(OrderBy::TermId));
        assert_eq!(a.sort_key(OrderBy::TermId).id, 30);
    }
}
