use super::Watcher;
use crate::objects::{Account, Document};
use bitflags::bitflags;

bitflags! {
    /// Changes observed on an account or on documents it authored
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccountEvents: u32 {
        const PAGE_LINK_UPDATED   = 1 << 0;
        const DELETED             = 1 << 1;
        const REGISTERED          = 1 << 2;
        const POST_AUTHOR_UPDATED = 1 << 3;
        const POST_STATUS_UPDATED = 1 << 4;
    }
}

impl Watcher<AccountEvents> {
    pub fn account_registered(&mut self, account_id: i64) {
        self.add_events(account_id, AccountEvents::REGISTERED);
    }

    pub fn account_updated(&mut self, before: &Account, after: &Account) {
        let mut events = AccountEvents::empty();
        if before.permalink != after.permalink {
            events |= AccountEvents::PAGE_LINK_UPDATED;
        }
        if before.published_posts != after.published_posts {
            events |= AccountEvents::POST_STATUS_UPDATED;
        }
        self.add_events(after.id, events);
    }

    pub fn account_deleted(&mut self, account_id: i64) {
        self.add_events(account_id, AccountEvents::DELETED);
    }

    /// A document was created (`before` is `None`) or changed.
    ///
    /// Authorship and status changes can make both the old and the new author
    /// (un)indexable.
    pub fn authored_document_updated(&mut self, before: Option<&Document>, after: &Document) {
        let events = match before {
            None => AccountEvents::POST_AUTHOR_UPDATED | AccountEvents::POST_STATUS_UPDATED,
            Some(before) => {
                let mut events = AccountEvents::empty();
                if before.author_id != after.author_id {
                    events |= AccountEvents::POST_AUTHOR_UPDATED;
                }
                if before.status != after.status {
                    events |= AccountEvents::POST_STATUS_UPDATED;
                }
                events
            }
        };
        if events.is_empty() {
            return;
        }

        let authors = [before.and_then(|d| d.author_id), after.author_id];
        for author_id in authors.into_iter().flatten() {
            if author_id > 0 {
                self.add_events(author_id, events);
            }
        }
    }
}
