use super::Watcher;
use crate::objects::Term;
use bitflags::bitflags;

bitflags! {
    /// Changes observed on a term
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TermEvents: u32 {
        const SAVED         = 1 << 0;
        const DELETED       = 1 << 1;
        const LINK_UPDATED  = 1 << 2;
        const COUNT_UPDATED = 1 << 3;
    }
}

impl Watcher<TermEvents> {
    pub fn term_saved(&mut self, term: &Term) {
        self.add_events(term.term_taxonomy_id, TermEvents::SAVED);
    }

    pub fn term_updated(&mut self, before: &Term, after: &Term) {
        let mut events = TermEvents::SAVED;
        if before.permalink != after.permalink {
            events |= TermEvents::LINK_UPDATED;
        }
        if before.count != after.count {
            events |= TermEvents::COUNT_UPDATED;
        }
        self.add_events(after.term_taxonomy_id, events);
    }

    /// The number of documents assigned to a term changed
    pub fn term_count_updated(&mut self, term_taxonomy_id: i64) {
        self.add_events(term_taxonomy_id, TermEvents::COUNT_UPDATED);
    }

    pub fn term_deleted(&mut self, term_taxonomy_id: i64) {
        self.add_events(term_taxonomy_id, TermEvents::DELETED);
    }
}
