//! Embeddable CLI layer for the driftway migration runner
//!
//! The binary in this crate wires the in-memory backend for local use;
//! deployments embed [`execute`] with a [`Harness`] built around their real
//! clients.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use driftway::{
    load_plugin, Collaborators, MigrateConfig, MigrationRunner, Plugin, RunStats, ScriptRegistry,
};

#[derive(Parser)]
#[command(name = "driftway")]
#[command(about = "Versioned migration runner for remote document databases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations from a directory
    Migrate(MigrateArgs),
}

#[derive(clap::Args)]
pub struct MigrateArgs {
    /// Directory containing migration script files
    pub dir: PathBuf,

    /// Target project identifier
    #[arg(long)]
    pub project: String,

    /// Observe and count writes without committing them
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Block, without timeout, until self-started asynchronous work settles
    #[arg(long)]
    pub force_wait: bool,

    /// Plugin to load before migrations run
    #[arg(long)]
    pub require: Option<String>,

    /// History collection name
    #[arg(long, default_value = driftway::DEFAULT_COLLECTION)]
    pub collection: String,

    /// Principal to impersonate instead of using direct credentials
    #[arg(long)]
    pub impersonate: Option<String>,

    /// Name of the secret holding the search-index credentials
    #[arg(long)]
    pub index_secret: Option<String>,
}

impl MigrateArgs {
    fn to_config(&self) -> MigrateConfig {
        MigrateConfig {
            dir: self.dir.clone(),
            project_id: self.project.clone(),
            collection: self.collection.clone(),
            dry_run: self.dry_run,
            force_wait: self.force_wait,
            impersonate: self.impersonate.clone(),
            index_secret: self.index_secret.clone(),
            ..MigrateConfig::default()
        }
    }
}

/// Everything the CLI needs besides the parsed arguments
pub struct Harness {
    pub collaborators: Collaborators,
    pub registry: ScriptRegistry,
    pub plugins: Vec<Box<dyn Plugin>>,
}

/// Install the global tracing subscriber; `debug` lowers the filter level
pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run the parsed command against the harness and print the run summary
pub async fn execute(cli: Cli, harness: Harness) -> anyhow::Result<RunStats> {
    match cli.command {
        Commands::Migrate(args) => migrate(args, harness).await,
    }
}

async fn migrate(args: MigrateArgs, mut harness: Harness) -> anyhow::Result<RunStats> {
    if let Some(plugin) = &args.require {
        load_plugin(&harness.plugins, plugin, &mut harness.registry)?;
    }

    let runner = MigrationRunner::new(args.to_config(), harness.collaborators, harness.registry);
    let stats = runner.migrate().await?;

    println!("{}", summary(&stats, args.dry_run));
    Ok(stats)
}

fn summary(stats: &RunStats, dry_run: bool) -> String {
    format!(
        "{}Scanned {} files, executed {} migrations (created {}, set {}, updated {}, deleted {}, added {})",
        if dry_run { "[dry run] " } else { "" },
        stats.scanned_files,
        stats.executed_files,
        stats.created,
        stats.set,
        stats.updated,
        stats.deleted,
        stats.added,
    )
}
