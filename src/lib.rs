//! sitemapper: incrementally maintained, paginated sitemap indexes
//!
//! The engine keeps one ordered index per object type and subtype in SQLite
//! and updates it from host change events without rebuilding it.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod jobs;
pub mod lock;
pub mod objects;
pub mod progress;
pub mod provider;
pub mod store;
pub mod util;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::Sitemaps;
pub use error::{Error, Result};
