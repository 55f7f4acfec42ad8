//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::Db;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitInfo {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

/// Write the default configuration and create the database schema
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<InitInfo> {
    let config = Config::for_base_dir(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.save()?;

    let db = Db::connect(&config).await?;
    db.init_schema().await?;
    db.close().await;

    info!("Initialized sitemapper in {:?}", config.paths.base_dir);
    Ok(InitInfo {
        config_path: config.paths.config_file,
        db_path: config.paths.db_file,
    })
}

pub fn print_init(info: &InitInfo) {
    println!("✓ sitemapper initialized successfully");
    println!("  Config: {}", info.config_path.display());
    println!("  Database: {}", info.db_path.display());
    println!("\nNext steps:");
    println!("  1. Set site.base_url in the config file");
    println!("  2. Mirror host content into the host_* tables");
    println!("  3. Build the sitemaps: sitemapper index");
}
