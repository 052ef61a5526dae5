use std::sync::Arc;

use clap::Parser;

use driftway::backends::memory::{
    MemoryDatabase, MemorySearchIndexFactory, MemorySecretStore, StaticCredentials,
};
use driftway::{Collaborators, ScriptRegistry};
use driftway_cli::{execute, init_tracing, Cli, Commands, Harness};

/// Local-mode harness over the in-memory backend. Deployments targeting a
/// real database embed `driftway_cli::execute` with their own clients.
fn local_harness() -> Harness {
    Harness {
        collaborators: Collaborators {
            database: Arc::new(MemoryDatabase::new()),
            secrets: Arc::new(MemorySecretStore::new()),
            search: Arc::new(MemorySearchIndexFactory::default()),
            credentials: Arc::new(StaticCredentials::new(whoami())),
        },
        registry: ScriptRegistry::new(),
        plugins: Vec::new(),
    }
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "driftway".to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug = match &cli.command {
        Commands::Migrate(args) => args.debug,
    };
    init_tracing(debug);

    if let Err(err) = execute(cli, local_harness()).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
