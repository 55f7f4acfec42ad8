//! Configuration management for sitemapper
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::index::PageOrder;
use crate::objects::{ObjectType, OrderBy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Largest page the sitemap protocol allows
pub const MAX_SITEMAP_PAGE_SIZE: usize = 50_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Site settings
    #[serde(default)]
    pub site: SiteConfig,

    /// Sitemap lock settings
    #[serde(default)]
    pub lock: LockConfig,

    /// Job queue settings
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Bulk indexing settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Sitemap page settings
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Document sitemaps
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Account (author) sitemap
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Taxonomy term sitemaps
    #[serde(default)]
    pub terms: TermsConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Absolute home URL; permalinks are stored relative to it
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Lease lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_lock_max_tries")]
    pub max_tries: u32,

    #[serde(default = "default_lock_wait_secs")]
    pub wait_secs: u64,

    #[serde(default = "default_lock_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl LockConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum jobs claimed per sitemap and run
    #[serde(default = "default_job_batch_size")]
    pub batch_size: usize,

    /// Disable the synchronous append path
    #[serde(default = "default_force_queue_add")]
    pub force_queue_add: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Objects per page while bulk indexing or refreshing entries
    #[serde(default = "default_index_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_pagination_page_size")]
    pub page_size: usize,

    #[serde(default = "default_pagination_order")]
    pub order: PageOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Document kinds with a sitemap
    #[serde(default = "default_document_kinds")]
    pub kinds: Vec<String>,

    /// Statuses that make a document indexable
    #[serde(default = "default_document_statuses")]
    pub indexable_statuses: Vec<String>,

    #[serde(default = "default_document_order")]
    pub order_by: OrderBy,

    /// Metadata keys whose change may affect indexability
    #[serde(default)]
    pub invalidating_meta_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_accounts_enabled")]
    pub enabled: bool,

    #[serde(default = "default_account_order")]
    pub order_by: OrderBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermsConfig {
    /// Taxonomies with a sitemap
    #[serde(default = "default_term_taxonomies")]
    pub taxonomies: Vec<String>,

    /// Leave terms without documents out
    #[serde(default = "default_terms_hide_empty")]
    pub hide_empty: bool,

    #[serde(default = "default_term_order")]
    pub order_by: OrderBy,
}

/// Paths configuration (computed, not serialized)
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory (~/.sitemapper)
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_lock_max_age_secs(),
            max_tries: default_lock_max_tries(),
            wait_secs: default_lock_wait_secs(),
            initial_backoff_ms: default_lock_initial_backoff_ms(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_job_batch_size(),
            force_queue_add: default_force_queue_add(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: default_index_page_size(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_pagination_page_size(),
            order: default_pagination_order(),
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            kinds: default_document_kinds(),
            indexable_statuses: default_document_statuses(),
            order_by: default_document_order(),
            invalidating_meta_keys: Vec::new(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            enabled: default_accounts_enabled(),
            order_by: default_account_order(),
        }
    }
}

impl Default for TermsConfig {
    fn default() -> Self {
        Self {
            taxonomies: default_term_taxonomies(),
            hide_empty: default_terms_hide_empty(),
            order_by: default_term_order(),
        }
    }
}

impl Config {
    /// Get the default base directory for sitemapper (~/.sitemapper)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitemapper")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Default configuration rooted at `base_dir` (or the default base directory)
    pub fn for_base_dir(base_dir: Option<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(base_dir);
        config
    }

    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("sitemaps.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("sitemaps.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::for_base_dir(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Parsed site home URL
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.site.base_url)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url().map_err(|e| {
            Error::Config(format!("site.base_url '{}' is invalid: {}", self.site.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "site.base_url '{}' must be an absolute http(s) URL",
                self.site.base_url
            )));
        }

        if self.jobs.batch_size == 0 {
            return Err(Error::Config("jobs.batch_size must be greater than 0".into()));
        }

        if self.index.page_size == 0 {
            return Err(Error::Config("index.page_size must be greater than 0".into()));
        }

        if self.pagination.page_size == 0 || self.pagination.page_size > MAX_SITEMAP_PAGE_SIZE {
            return Err(Error::Config(format!(
                "pagination.page_size must be between 1 and {}",
                MAX_SITEMAP_PAGE_SIZE
            )));
        }

        if self.lock.max_tries == 0 {
            return Err(Error::Config("lock.max_tries must be greater than 0".into()));
        }

        for (object_type, order_by) in [
            (ObjectType::Document, self.documents.order_by),
            (ObjectType::Account, self.accounts.order_by),
            (ObjectType::Term, self.terms.order_by),
        ] {
            if !order_by.applies_to(object_type) {
                return Err(Error::Config(format!(
                    "{} sitemaps cannot be ordered by {}",
                    object_type, order_by
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.jobs.batch_size, 25);
        assert_eq!(config.lock.max_age_secs, 60);
        assert_eq!(config.lock.max_tries, 10);
        assert_eq!(config.documents.order_by, OrderBy::Modified);
        assert!(!config.jobs.force_queue_add);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.site.base_url = "https://example.org".to_string();
        config.terms.taxonomies = vec!["genre".to_string()];

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.site.base_url, "https://example.org");
        assert_eq!(loaded.terms.taxonomies, vec!["genre".to_string()]);
        assert_eq!(loaded.paths.db_file, tmp.path().join("sitemaps.db"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [site]
            base_url = "https://example.org"

            [pagination]
            order = "descending"
            "#,
        )
        .unwrap();

        assert_eq!(config.pagination.order, PageOrder::Descending);
        assert_eq!(config.pagination.page_size, 1000);
        assert_eq!(config.accounts.order_by, OrderBy::Registered);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.site.base_url = "https://example.org".to_string();
        assert!(config.validate().is_ok());

        config.pagination.page_size = MAX_SITEMAP_PAGE_SIZE + 1;
        assert!(config.validate().is_err());
        config.pagination.page_size = 500;

        config.documents.order_by = OrderBy::Login;
        assert!(config.validate().is_err());
        config.documents.order_by = OrderBy::Id;
        assert!(config.validate().is_ok());

        config.site.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
