//! `oxomo` command line.
//!
//! ## Commands
//!
//! - `oxomo checkpoint create|drop|status` - manage per-endpoint checkpoints
//! - `oxomo run` - harvest every pending item of every configured endpoint

pub mod checkpoint_cmd;
pub mod run_cmd;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use oxomo_core::{
    DocumentStore, ErrorCategory, HarvestConfig, HarvestError, Harvester, SqliteStore,
};
use oxomo_oai_client::{ClientOptions, OaiConnector};

pub use checkpoint_cmd::CheckpointCli;
pub use run_cmd::RunArgs;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    /// At least one endpoint was skipped (e.g. no checkpoint)
    pub const PARTIAL: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    /// Store failure, or remote failure while creating a checkpoint
    pub const FAILURE: i32 = 3;
}

/// oxomo — checkpointed OAI-PMH harvester
#[derive(Debug, Parser)]
#[command(name = "oxomo", version)]
pub struct OxomoCli {
    /// Config file (defaults to $OXOMO_CONFIG, then ~/.config/oxomo/oxomo.toml)
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: OxomoSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum OxomoSubcommand {
    /// Create, drop or inspect endpoint checkpoints
    Checkpoint(CheckpointCli),

    /// Harvest pending records and sets
    Run(RunArgs),
}

impl OxomoCli {
    pub async fn run(self) -> i32 {
        let config = self.config;
        match self.command {
            OxomoSubcommand::Checkpoint(cli) => cli.run(config.as_deref()).await,
            OxomoSubcommand::Run(args) => run_cmd::run(config.as_deref(), args).await,
        }
    }
}

/// Loaded config plus a harvester wired to the SQLite store and HTTP client.
pub(crate) struct Context {
    pub config: HarvestConfig,
    pub harvester: Harvester,
}

impl Context {
    pub(crate) fn load(config_path: Option<&Path>, workers: Option<usize>) -> anyhow::Result<Self> {
        let config = HarvestConfig::load(config_path)?;
        let options = config.harvest_options(workers);

        let store_path = config.resolved_store_path();
        // one connection per worker plus headroom for ledger reads
        let pool_size = u32::try_from(options.workers + 2).unwrap_or(u32::MAX);
        let store: Arc<dyn DocumentStore> = Arc::new(
            SqliteStore::open(&store_path, pool_size)
                .with_context(|| format!("opening store {}", store_path.display()))?,
        );
        let connector = OaiConnector::new(&ClientOptions::from(&config.http))
            .context("building HTTP client")?;

        tracing::debug!(
            store = %store_path.display(),
            database = %config.database,
            workers = options.workers,
            "context loaded"
        );
        let harvester = Harvester::new(store, Arc::new(connector), options);
        Ok(Self { config, harvester })
    }
}

/// Report a setup failure and map it to an exit code.
pub(crate) fn setup_failure(err: &anyhow::Error) -> i32 {
    eprintln!("error: {err:#}");
    match err.downcast_ref::<HarvestError>() {
        Some(e) if e.category() == ErrorCategory::ConfigError => exit_codes::CONFIG_ERROR,
        _ => exit_codes::FAILURE,
    }
}
