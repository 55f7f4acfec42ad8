//! Custom error types for sitemapper

use thiserror::Error;

/// Main error type for sitemapper operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Sitemap not found: {0}")]
    SitemapNotFound(i64),

    #[error("No sitemap for {object_type} {}", subtype.as_deref().unwrap_or("(all)"))]
    UnknownSitemap {
        object_type: String,
        subtype: Option<String>,
    },

    #[error("Sitemap already indexed: {0}")]
    AlreadyIndexed(String),

    #[error("Could not lock sitemap: {0}")]
    LockUnavailable(String),

    #[error("Not initialized: run 'sitemapper init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for sitemapper
pub type Result<T> = std::result::Result<T, Error>;
