//! Default values for configuration

use crate::index::PageOrder;
use crate::objects::OrderBy;

/// Default site home URL
pub fn default_base_url() -> String {
    std::env::var("SITEMAPPER_BASE_URL").unwrap_or_else(|_| "http://localhost".to_string())
}

/// Seconds after which a lock lease is considered abandoned
pub fn default_lock_max_age_secs() -> u64 {
    60
}

/// Maximum acquisition attempts per lock request
pub fn default_lock_max_tries() -> u32 {
    10
}

/// Default time to wait for a contended lock
pub fn default_lock_wait_secs() -> u64 {
    60
}

/// First backoff interval between lock attempts (doubles after every try)
pub fn default_lock_initial_backoff_ms() -> u64 {
    1000
}

/// Jobs claimed per run for one sitemap
pub fn default_job_batch_size() -> usize {
    crate::jobs::MAX_JOBS_CLAIMED
}

/// Always enqueue additions instead of appending synchronously
pub fn default_force_queue_add() -> bool {
    false
}

/// Host objects fetched per page while bulk indexing
pub fn default_index_page_size() -> usize {
    1000
}

/// Entries per sitemap page
pub fn default_pagination_page_size() -> usize {
    1000
}

/// Page ordering (stable pages, newest items on the last page)
pub fn default_pagination_order() -> PageOrder {
    PageOrder::Ascending
}

/// Document kinds that get their own sitemap
pub fn default_document_kinds() -> Vec<String> {
    vec!["post".to_string(), "page".to_string()]
}

/// Statuses a document must have to be listed
pub fn default_document_statuses() -> Vec<String> {
    vec!["publish".to_string()]
}

/// Documents are ordered by modification time
pub fn default_document_order() -> OrderBy {
    OrderBy::Modified
}

/// Emit an account sitemap
pub fn default_accounts_enabled() -> bool {
    true
}

/// Accounts are ordered by registration time
pub fn default_account_order() -> OrderBy {
    OrderBy::Registered
}

/// Taxonomies that get their own sitemap
pub fn default_term_taxonomies() -> Vec<String> {
    vec!["category".to_string(), "post_tag".to_string()]
}

/// Skip terms without any documents
pub fn default_terms_hide_empty() -> bool {
    true
}

/// Terms are ordered by term id
pub fn default_term_order() -> OrderBy {
    OrderBy::TermId
}
