//! Migration entry points
//!
//! Scripts on disk carry the version, description, and checksum; their
//! executable entry points are compiled into the binary and registered here
//! by filename. A scanned file with no registered entry point cannot be
//! loaded, which aborts the run before the migration is attempted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::core::{DocumentDatabase, Identity, SearchIndex, SecretStore};
use crate::error::{MigrateError, MigrateResult};
use crate::pending::TrackedSpawner;

/// Context handed to every migration entry point
#[derive(Clone)]
pub struct MigrateContext {
    /// Intercepted database handle; every mutation through it is observed
    pub database: Arc<dyn DocumentDatabase>,
    pub search: Arc<dyn SearchIndex>,
    pub secrets: Arc<dyn SecretStore>,
    /// Target/project identifier the run is pointed at
    pub project_id: String,
    /// Identity the run executes as
    pub identity: Identity,
    pub dry_run: bool,
    spawner: TrackedSpawner,
}

impl MigrateContext {
    pub(crate) fn new(
        database: Arc<dyn DocumentDatabase>,
        search: Arc<dyn SearchIndex>,
        secrets: Arc<dyn SecretStore>,
        project_id: String,
        identity: Identity,
        dry_run: bool,
        spawner: TrackedSpawner,
    ) -> Self {
        Self {
            database,
            search,
            secrets,
            project_id,
            identity,
            dry_run,
            spawner,
        }
    }

    /// Start asynchronous work within the tracked scope. Work started here
    /// and left unawaited is reported when the migration returns.
    #[track_caller]
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.spawner.spawn(fut);
    }
}

/// A migration's executable entry point
#[async_trait]
pub trait MigrationScript: Send + Sync {
    async fn run(&self, ctx: &MigrateContext) -> anyhow::Result<()>;
}

struct FnScript<F>(F);

#[async_trait]
impl<F, Fut> MigrationScript for FnScript<F>
where
    F: Fn(MigrateContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, ctx: &MigrateContext) -> anyhow::Result<()> {
        (self.0)(ctx.clone()).await
    }
}

/// Filename-keyed registry of entry points
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Arc<dyn MigrationScript>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filename: impl Into<String>, script: Arc<dyn MigrationScript>) {
        self.scripts.insert(filename.into(), script);
    }

    /// Register an async function or closure as a script's entry point
    pub fn register_fn<F, Fut>(&mut self, filename: impl Into<String>, f: F)
    where
        F: Fn(MigrateContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(filename, Arc::new(FnScript(f)));
    }

    /// Resolve a scanned file's entry point; missing entry points abort the
    /// run before the migration is attempted
    pub fn resolve(&self, filename: &str) -> MigrateResult<Arc<dyn MigrationScript>> {
        self.scripts
            .get(filename)
            .cloned()
            .ok_or_else(|| MigrateError::ScriptNotFound {
                script: filename.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// An extension loaded for side effects before migrations run
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, registry: &mut ScriptRegistry) -> MigrateResult<()>;
}

/// Load the named plugin into `registry`; unknown names and load failures
/// are fatal
pub fn load_plugin(
    plugins: &[Box<dyn Plugin>],
    name: &str,
    registry: &mut ScriptRegistry,
) -> MigrateResult<()> {
    let plugin = plugins
        .iter()
        .find(|p| p.name() == name)
        .ok_or_else(|| MigrateError::Plugin {
            plugin: name.to_string(),
            message: "no such plugin".to_string(),
        })?;
    tracing::info!(plugin = name, "loading plugin");
    plugin.load(registry).map_err(|e| MigrateError::Plugin {
        plugin: name.to_string(),
        message: e.to_string(),
    })
}
