mod catalog;
mod ingest;
mod rank;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trendpulse_core::EntityKind;

#[derive(Debug, Parser)]
#[command(name = "trendpulse-cli")]
#[command(about = "Trend aggregation and scoring command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion pass, seal closed windows, and print the top entities
    Ingest {
        /// Entities to print per kind
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Print the latest persisted ranking for one entity kind
    Rank {
        /// trend, brand or style
        #[arg(long)]
        kind: EntityKind,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Apply pending database migrations
    Migrate,
    /// Validate an entity seed catalog
    Catalog {
        /// Catalog file; defaults to `TRENDPULSE_CATALOG_PATH`
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("trendpulse-cli: pass --help for available commands");
        return Ok(());
    };

    let config = trendpulse_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match command {
        Commands::Ingest { top } => ingest::run_ingest(&config, top).await,
        Commands::Rank { kind, limit } => rank::run_rank(&config, kind, limit).await,
        Commands::Migrate => {
            let pool = trendpulse_db::connect_pool_from_config(&config).await?;
            let applied = trendpulse_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
            Ok(())
        }
        Commands::Catalog { path } => {
            let path = path.unwrap_or_else(|| config.catalog_path.clone());
            catalog::run_catalog(&path)
        }
    }
}

#[cfg(test)]
mod tests;
