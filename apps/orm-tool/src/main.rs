//! Command-line driver for the persistence context engine.
//!
//! Runs the Parent/Child scenarios against a fresh in-memory storage
//! engine and reports what the persistence context did.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use orm_core::{EntityManagerFactory, FlushMode, PersistenceConfig, PersistenceError};
use orm_model::scenarios;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the scenario runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Flush mode override (auto or commit)
    #[arg(long)]
    flush_mode: Option<FlushMode>,

    /// Skip ORM_* environment overrides
    #[arg(long)]
    no_env: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Persist, update, detach/merge, re-read, orphan and remove one parent
    Lifecycle,

    /// Insert many parents, flushing and clearing every batch
    BulkInsert {
        /// Number of parents to insert
        #[arg(short, long, default_value_t = 100_000)]
        count: usize,

        /// Operations between flush + clear (overrides the config file)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Merge an already managed parent and show the commit being rolled back
    MergeManaged,

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<PersistenceConfig> {
    let mut config = match &cli.config {
        Some(path) => PersistenceConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PersistenceConfig::default(),
    };
    if !cli.no_env {
        config.apply_env_overrides()?;
    }
    if let Some(mode) = cli.flush_mode {
        config.flush_mode = mode;
    }
    if let Commands::BulkInsert {
        batch_size: Some(batch_size),
        ..
    } = cli.command
    {
        config.batch_size = batch_size;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&cli)?;
    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let factory = EntityManagerFactory::in_memory(orm_model::metadata()?, config)?;

    match cli.command {
        Commands::Lifecycle => {
            let start = Instant::now();
            let id = scenarios::run_lifecycle(&factory)?;
            info!("Lifecycle of parent {} completed in {:?}", id, start.elapsed());
        }
        Commands::BulkInsert { count, .. } => {
            let start = Instant::now();
            let inserted = scenarios::bulk_insert(&factory, count)?;
            let elapsed = start.elapsed();
            let per_sec = if elapsed.as_secs_f64() == 0.0 {
                0.0
            } else {
                inserted as f64 / elapsed.as_secs_f64()
            };
            info!(
                "Inserted {} parents in {:?} ({:.0} entities/sec, batch size {})",
                inserted,
                elapsed,
                per_sec,
                factory.config().batch_size
            );
        }
        Commands::MergeManaged => {
            let id = scenarios::cascade_persist(&factory)?;
            match scenarios::merge_managed(&factory, id) {
                Err(PersistenceError::ConcurrentModification { reason, .. }) => {
                    info!("Commit rolled back as expected: {}", reason);
                }
                Err(e) => {
                    error!("Unexpected failure: {}", e);
                    return Err(e.into());
                }
                Ok(report) => bail!("Commit succeeded unexpectedly: {:?}", report),
            }
        }
        Commands::Config => {}
    }
    Ok(())
}
