//! sitemapper CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use sitemapper::{
    commands::{
        cmd_index, cmd_init, cmd_pages, cmd_run_jobs, cmd_schedule_reindex, cmd_status,
        print_index_reports, print_init, print_job_reports, print_pages, print_status,
        IndexOptions,
    },
    config::Config,
    error::Result,
    objects::ObjectType,
    progress::LogWriterFactory,
    Sitemaps,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sitemapper")]
#[command(version, about = "Incrementally maintained sitemap indexes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize sitemapper configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Bulk index sitemaps from the host objects
    Index {
        /// Object type (document, account, term); all types when omitted
        #[arg(long = "type")]
        object_type: Option<ObjectType>,

        /// Only these subtypes (document kinds, taxonomies)
        #[arg(long)]
        subtype: Option<Vec<String>>,

        /// Drop existing entries and index again
        #[arg(long)]
        force: bool,
    },

    /// Process queued sitemap jobs
    RunJobs {
        /// Object type (document, account, term); all types when omitted
        #[arg(long = "type")]
        object_type: Option<ObjectType>,

        /// Only these subtypes
        #[arg(long)]
        subtype: Option<Vec<String>>,
    },

    /// Queue a full reindex of one sitemap
    ScheduleReindex {
        #[arg(long = "type")]
        object_type: ObjectType,

        #[arg(long)]
        subtype: Option<String>,
    },

    /// Show sitemap status and queue depth
    Status,

    /// List the page URLs of one sitemap
    Pages {
        #[arg(long = "type")]
        object_type: ObjectType,

        #[arg(long)]
        subtype: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let base_dir = cli.config.as_deref().map(config_base_dir);
        let info = cmd_init(base_dir, force).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            print_init(&info);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "sitemapper", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let engine = Sitemaps::open(config.clone()).await?;

    match cli.command {
        Commands::Index {
            object_type,
            subtype,
            force,
        } => {
            let options = IndexOptions {
                object_type,
                subtypes: subtype,
                force,
                show_progress: !cli.json,
            };
            let reports = cmd_index(&engine, options).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_index_reports(&reports);
            }
        }

        Commands::RunJobs {
            object_type,
            subtype,
        } => {
            let reports = cmd_run_jobs(&engine, object_type, subtype.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_job_reports(&reports);
            }
        }

        Commands::ScheduleReindex {
            object_type,
            subtype,
        } => {
            let scheduled = cmd_schedule_reindex(&engine, object_type, subtype.as_deref()).await?;

            if cli.json {
                println!(r#"{{"scheduled": {}}}"#, scheduled);
            } else if scheduled {
                println!("✓ Full reindex scheduled; it runs with the next 'sitemapper run-jobs'");
            } else {
                println!("A full reindex is already pending");
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &engine).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Pages {
            object_type,
            subtype,
        } => {
            let pages = cmd_pages(&engine, object_type, subtype.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&pages)?);
            } else {
                print_pages(&pages);
            }
        }

        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),
    }

    engine.db().close().await;
    Ok(())
}

/// Base directory for `init`: the parent of a `.toml` path, or the directory itself
fn config_base_dir(path: &std::path::Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "toml") {
        path.parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir)
    } else {
        path.to_path_buf()
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'sitemapper init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
