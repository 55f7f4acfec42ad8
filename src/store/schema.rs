//! SQLite schema definition

/// SQL schema for the sitemap database
pub const SCHEMA_SQL: &str = r#"
-- Sitemaps: one per (object type, subtype)
CREATE TABLE IF NOT EXISTS sitemaps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_type TEXT NOT NULL,
    object_subtype TEXT,
    status TEXT NOT NULL DEFAULT 'unindexed',
    item_count INTEGER NOT NULL DEFAULT 0,
    last_object_id INTEGER,
    last_item_index INTEGER,
    last_indexed_value TEXT,
    last_indexed_id INTEGER,
    last_modified TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sitemaps_object_type
    ON sitemaps(object_type, COALESCE(object_subtype, ''));

-- Entries: one row per object per sitemap, identical shape for every object type
CREATE TABLE IF NOT EXISTS sitemap_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sitemap_id INTEGER NOT NULL REFERENCES sitemaps(id) ON DELETE CASCADE,
    object_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    sort_value TEXT NOT NULL,
    last_modified TEXT,
    last_modified_object_id INTEGER,
    item_index INTEGER,
    next_item_index INTEGER,
    UNIQUE(sitemap_id, object_id)
);

CREATE INDEX IF NOT EXISTS idx_sitemap_documents_index ON sitemap_documents(sitemap_id, item_index);
CREATE INDEX IF NOT EXISTS idx_sitemap_documents_order ON sitemap_documents(sitemap_id, sort_value, object_id);
CREATE INDEX IF NOT EXISTS idx_sitemap_documents_object ON sitemap_documents(object_id);

CREATE TABLE IF NOT EXISTS sitemap_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sitemap_id INTEGER NOT NULL REFERENCES sitemaps(id) ON DELETE CASCADE,
    object_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    sort_value TEXT NOT NULL,
    last_modified TEXT,
    last_modified_object_id INTEGER,
    item_index INTEGER,
    next_item_index INTEGER,
    UNIQUE(sitemap_id, object_id)
);

CREATE INDEX IF NOT EXISTS idx_sitemap_accounts_index ON sitemap_accounts(sitemap_id, item_index);
CREATE INDEX IF NOT EXISTS idx_sitemap_accounts_order ON sitemap_accounts(sitemap_id, sort_value, object_id);
CREATE INDEX IF NOT EXISTS idx_sitemap_accounts_object ON sitemap_accounts(object_id);

CREATE TABLE IF NOT EXISTS sitemap_terms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sitemap_id INTEGER NOT NULL REFERENCES sitemaps(id) ON DELETE CASCADE,
    object_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    sort_value TEXT NOT NULL,
    last_modified TEXT,
    last_modified_object_id INTEGER,
    item_index INTEGER,
    next_item_index INTEGER,
    UNIQUE(sitemap_id, object_id)
);

CREATE INDEX IF NOT EXISTS idx_sitemap_terms_index ON sitemap_terms(sitemap_id, item_index);
CREATE INDEX IF NOT EXISTS idx_sitemap_terms_order ON sitemap_terms(sitemap_id, sort_value, object_id);
CREATE INDEX IF NOT EXISTS idx_sitemap_terms_object ON sitemap_terms(object_id);

-- Jobs: pending incremental work; duplicates collapse while unclaimed
CREATE TABLE IF NOT EXISTS sitemap_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sitemap_id INTEGER NOT NULL REFERENCES sitemaps(id) ON DELETE CASCADE,
    sitemap_item_id INTEGER,
    object_id INTEGER,
    action TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    claim_id TEXT,
    claimed_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sitemap_jobs_pending
    ON sitemap_jobs(sitemap_id, COALESCE(object_id, -1), action)
    WHERE claim_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_sitemap_jobs_schedule ON sitemap_jobs(sitemap_id, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_sitemap_jobs_claim ON sitemap_jobs(claim_id);

-- Locks: named leases, acquired_at in unix milliseconds
CREATE TABLE IF NOT EXISTS locks (
    name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);

-- Host mirror: objects the sitemaps are built from
CREATE TABLE IF NOT EXISTS host_documents (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    author_id INTEGER,
    modified TEXT NOT NULL,
    permalink TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_host_documents_modified ON host_documents(kind, modified, id);

CREATE TABLE IF NOT EXISTS host_accounts (
    id INTEGER PRIMARY KEY,
    login TEXT NOT NULL,
    registered TEXT NOT NULL,
    modified TEXT,
    published_posts INTEGER NOT NULL DEFAULT 0,
    permalink TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS host_terms (
    term_taxonomy_id INTEGER PRIMARY KEY,
    term_id INTEGER NOT NULL,
    taxonomy TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    permalink TEXT NOT NULL,
    last_modified TEXT,
    last_modified_object_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_host_terms_term ON host_terms(taxonomy, term_id, term_taxonomy_id);
"#;
