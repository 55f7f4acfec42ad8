//! Status command implementation

use crate::config::Config;
use crate::engine::{SitemapSummary, Sitemaps};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub base_url: String,
    pub sitemaps: Vec<SitemapSummary>,
}

/// Get system status
pub async fn cmd_status(config: &Config, engine: &Sitemaps) -> Result<StatusInfo> {
    info!("Getting status");

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        base_url: config.site.base_url.clone(),
        sitemaps: engine.status().await?,
    })
}

pub fn print_status(status: &StatusInfo) {
    println!("\n📊 sitemapper Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Site: {}", status.base_url);

    if status.sitemaps.is_empty() {
        println!("\nNo sitemaps yet. Use 'sitemapper index' to build them.");
        return;
    }

    println!("\nSitemaps:");
    for summary in &status.sitemaps {
        let sitemap = &summary.sitemap;
        println!("  {} ({})", sitemap.description(), sitemap.status);
        println!("    Items: {}", sitemap.item_count);
        println!(
            "    Last modified: {}",
            sitemap.last_modified.as_deref().unwrap_or("-")
        );
        println!(
            "    Jobs: {} pending, {} claimed",
            summary.pending_jobs, summary.claimed_jobs
        );
    }
}
