//! Host objects that sitemaps are built from
//!
//! Three object types are supported:
//! - Documents (one sitemap per document kind)
//! - Accounts (a single author sitemap)
//! - Terms (one sitemap per taxonomy)
//!
//! The host owns these objects; the engine only reads them through an
//! [`ObjectSource`] and orders them by a [`SortKey`].

mod account;
mod document;
mod source;
mod term;

pub use account::*;
pub use document::*;
pub use source::*;
pub use term::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Object types that can have sitemaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ObjectType {
    Document,
    Account,
    Term,
}

impl ObjectType {
    pub const ALL: [ObjectType; 3] = [ObjectType::Document, ObjectType::Account, ObjectType::Term];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Document => "document",
            ObjectType::Account => "account",
            ObjectType::Term => "term",
        }
    }

    /// Entry table for sitemaps of this type
    pub fn entry_table(&self) -> &'static str {
        match self {
            ObjectType::Document => "sitemap_documents",
            ObjectType::Account => "sitemap_accounts",
            ObjectType::Term => "sitemap_terms",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document" | "documents" => Ok(ObjectType::Document),
            "account" | "accounts" => Ok(ObjectType::Account),
            "term" | "terms" => Ok(ObjectType::Term),
            _ => Err(Error::Config(format!("Unknown object type: {}", s))),
        }
    }
}

/// Field that defines the canonical order of a sitemap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Id,
    Modified,
    Registered,
    Login,
    TermId,
}

impl OrderBy {
    /// Whether objects of `object_type` can be sorted by this field
    pub fn applies_to(&self, object_type: ObjectType) -> bool {
        matches!(
            (object_type, self),
            (_, OrderBy::Id)
                | (ObjectType::Document, OrderBy::Modified)
                | (ObjectType::Account, OrderBy::Registered)
                | (ObjectType::Account, OrderBy::Login)
                | (ObjectType::Term, OrderBy::TermId)
        )
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderBy::Id => "id",
            OrderBy::Modified => "modified",
            OrderBy::Registered => "registered",
            OrderBy::Login => "login",
            OrderBy::TermId => "term_id",
        };
        f.write_str(name)
    }
}

/// Position of an object in canonical order: the order-by value, then the object id.
///
/// Values are stored as text. Integers are zero-padded and timestamps use the
/// fixed storage format, so comparing the text compares the values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub value: String,
    pub id: i64,
}

impl SortKey {
    pub fn new(value: impl Into<String>, id: i64) -> Self {
        Self {
            value: value.into(),
            id,
        }
    }

    pub fn integer(value: i64, id: i64) -> Self {
        Self::new(format!("{:020}", value.max(0)), id)
    }

    pub fn timestamp(value: &DateTime<Utc>, id: i64) -> Self {
        Self::new(crate::util::format_timestamp(value), id)
    }

    /// Integer form of the value, for sources that compare natively
    pub fn integer_value(&self) -> Option<i64> {
        self.value.parse().ok()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.value, self.id)
    }
}

/// An object owned by the host that can be listed in a sitemap
pub trait HostObject: Clone + fmt::Debug + Send + Sync + 'static {
    const OBJECT_TYPE: ObjectType;

    fn object_id(&self) -> i64;

    /// Sitemap subtype the object belongs to (kind, taxonomy), if any
    fn subtype(&self) -> Option<&str>;

    fn permalink(&self) -> &str;

    fn sort_key(&self, order_by: OrderBy) -> SortKey;

    fn last_modified(&self) -> Option<DateTime<Utc>>;

    /// Object the last-modified date was derived from
    fn last_modified_object_id(&self) -> Option<i64> {
        None
    }
}

/// Read access to the host's objects of one type
#[async_trait]
pub trait ObjectSource<O: HostObject>: Send + Sync {
    async fn get(&self, object_id: i64) -> Result<Option<O>>;

    async fn get_many(&self, object_ids: &[i64]) -> Result<Vec<O>> {
        let mut objects = Vec::with_capacity(object_ids.len());
        for id in object_ids {
            if let Some(object) = self.get(*id).await? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Objects of a subtype in canonical order, strictly after `after`
    async fn list(
        &self,
        subtype: Option<&str>,
        order_by: OrderBy,
        after: Option<&SortKey>,
        limit: usize,
    ) -> Result<Vec<O>>;
}
