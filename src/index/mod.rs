//! Sitemap ordering: bulk population, batch splicing and pagination

mod batch;
mod bulk;
mod paginate;

pub use batch::*;
pub use bulk::*;
pub use paginate::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction in which pages walk the ordered entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageOrder {
    #[default]
    Ascending,
    /// Newest entries on the first page
    Descending,
}

impl fmt::Display for PageOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageOrder::Ascending => write!(f, "ascending"),
            PageOrder::Descending => write!(f, "descending"),
        }
    }
}
