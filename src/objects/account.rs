use super::{HostObject, ObjectType, OrderBy, SortKey};
use crate::config::AccountsConfig;
use crate::provider::ObjectPolicy;
use crate::watcher::{AccountEvents, Invalidations};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A user account; listed when it authored published documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub login: String,
    pub registered: DateTime<Utc>,
    pub modified: Option<DateTime<Utc>>,
    pub published_posts: i64,
    pub permalink: String,
}

impl HostObject for Account {
    const OBJECT_TYPE: ObjectType = ObjectType::Account;

    fn object_id(&self) -> i64 {
        self.id
    }

    fn subtype(&self) -> Option<&str> {
        None
    }

    fn permalink(&self) -> &str {
        &self.permalink
    }

    fn sort_key(&self, order_by: OrderBy) -> SortKey {
        match order_by {
            OrderBy::Registered => SortKey::timestamp(&self.registered, self.id),
            OrderBy::Login => SortKey::new(self.login.clone(), self.id),
            _ => SortKey::integer(self.id, self.id),
        }
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.modified.or(Some(self.registered))
    }
}

#[derive(Debug, Clone)]
pub struct AccountPolicy {
    config: AccountsConfig,
    base_url: Url,
}

impl AccountPolicy {
    pub fn new(config: AccountsConfig, base_url: Url) -> Self {
        Self { config, base_url }
    }
}

impl ObjectPolicy for AccountPolicy {
    type Object = Account;
    type Events = AccountEvents;

    fn subtypes(&self) -> Vec<Option<String>> {
        if self.config.enabled {
            vec![None]
        } else {
            Vec::new()
        }
    }

    fn order_by(&self) -> OrderBy {
        self.config.order_by
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn is_indexable(&self, account: &Account) -> bool {
        self.config.enabled && account.published_posts > 0
    }

    fn invalidations(&self, events: AccountEvents) -> Invalidations {
        if events.contains(AccountEvents::DELETED) {
            return Invalidations::OBJECT_EXISTS;
        }

        let mut invalidations = Invalidations::empty();
        if events.intersects(
            AccountEvents::REGISTERED
                | AccountEvents::POST_AUTHOR_UPDATED
                | AccountEvents::POST_STATUS_UPDATED,
        ) {
            invalidations |= Invalidations::IS_INDEXABLE;
        }
        if events.contains(AccountEvents::PAGE_LINK_UPDATED) {
            invalidations |= Invalidations::ITEM_URL;
        }
        invalidations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::account;

    #[test]
    fn test_accounts_need_published_posts() {
        let policy = AccountPolicy::new(
            AccountsConfig::default(),
            Url::parse("https://example.org/").unwrap(),
        );
        let mut author = account(3, "alice", 1);
        assert!(policy.is_indexable(&author));

        author.published_posts = 0;
        assert!(!policy.is_indexable(&author));
    }

    #[test]
    fn test_disabled_accounts_have_no_sitemaps() {
        let policy = AccountPolicy::new(
            AccountsConfig {
                enabled: false,
                ..AccountsConfig::default()
            },
            Url::parse("https://example.org/").unwrap(),
        );
        assert!(policy.subtypes().is_empty());
        assert!(!policy.is_indexable(&account(3, "alice", 1)));
    }

    #[test]
    fn test_login_order() {
        let a = account(9, "alice", 5);
        let b = account(2, "bob", 1);
        assert!(a.sort_key(OrderBy::Login) < b.sort_key(OrderBy::Login));
        assert!(a.sort_key(OrderBy::Registered) > b.sort_key(OrderBy::Registered));
    }
}
