//! Execution pipeline
//!
//! Drives one `migrate()` invocation through scanning, authentication,
//! history reconciliation, and the per-migration prepare/run/record loop.
//! Migrations execute strictly in ascending version order, one at a time,
//! and the run halts at the first failure after its history record is
//! durably written.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::backends::core::{
    CredentialProvider, DocumentDatabase, Identity, SearchIndex, SearchIndexFactory, SecretStore,
};
use crate::discovery::{scan_directory, MigrationFile};
use crate::error::{MigrateError, MigrateResult};
use crate::history::{HistoryRecord, HistoryStore, DEFAULT_COLLECTION};
use crate::intercept::InterceptedDatabase;
use crate::pending::WorkTracker;
use crate::script::{MigrateContext, ScriptRegistry};
use crate::stats::{RunHandle, RunStats, StatsCell, StatsRegistry};
use crate::version::{script_type, Version};

/// Access scopes requested for the run's identity
const DEFAULT_SCOPES: &[&str] = &["datastore", "cloud-platform"];

/// Configuration for one `migrate()` invocation
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Directory holding the migration script files
    pub dir: PathBuf,
    /// Target/project identifier
    pub project_id: String,
    /// History collection name
    pub collection: String,
    /// Observe and count writes without committing them
    pub dry_run: bool,
    /// Block, without timeout, until a migration's self-started
    /// asynchronous work settles
    pub force_wait: bool,
    /// Principal to impersonate; the direct identity is used when absent
    pub impersonate: Option<String>,
    /// Lifetime requested for impersonated tokens
    pub token_lifetime: Duration,
    /// Name of the secret holding the search-index credentials
    pub index_secret: Option<String>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("migrations"),
            project_id: String::new(),
            collection: DEFAULT_COLLECTION.to_string(),
            dry_run: false,
            force_wait: false,
            impersonate: None,
            token_lifetime: Duration::from_secs(3600),
            index_secret: None,
        }
    }
}

/// The already-connected external clients handed to the engine
#[derive(Clone)]
pub struct Collaborators {
    pub database: Arc<dyn DocumentDatabase>,
    pub secrets: Arc<dyn SecretStore>,
    pub search: Arc<dyn SearchIndexFactory>,
    pub credentials: Arc<dyn CredentialProvider>,
}

/// Payload of the search-index credentials secret
#[derive(Deserialize)]
struct IndexCredentials {
    endpoint: String,
    api_key: String,
}

/// Placeholder search handle for runs with no index secret configured
struct NoSearchIndex;

#[async_trait::async_trait]
impl SearchIndex for NoSearchIndex {
    async fn upsert(
        &self,
        _index: &str,
        _id: &str,
        _doc: &crate::backends::core::Document,
    ) -> MigrateResult<()> {
        Err(MigrateError::SearchIndex {
            message: "no search index configured for this run".to_string(),
        })
    }

    async fn delete_object(&self, _index: &str, _id: &str) -> MigrateResult<()> {
        Err(MigrateError::SearchIndex {
            message: "no search index configured for this run".to_string(),
        })
    }
}

/// Releases the run's registry claim on every exit path
struct ClaimGuard {
    registry: StatsRegistry,
    tag: u64,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.registry.release(self.tag);
    }
}

/// One-invocation migration runner
pub struct MigrationRunner {
    config: MigrateConfig,
    collaborators: Collaborators,
    registry: ScriptRegistry,
}

impl MigrationRunner {
    pub fn new(
        config: MigrateConfig,
        collaborators: Collaborators,
        registry: ScriptRegistry,
    ) -> Self {
        Self {
            config,
            collaborators,
            registry,
        }
    }

    /// Apply every pending migration in ascending version order.
    ///
    /// Returns the run's statistics, or the first fatal error. A migration
    /// failure surfaces only after its history record is written.
    pub async fn migrate(&self) -> MigrateResult<RunStats> {
        // Scanning
        let candidates = scan_directory(&self.config.dir)?;
        let stats = StatsCell::new();
        stats.record_scanned(candidates.len() as u64);

        // Authenticating
        let identity = self.authenticate().await?;
        let search = self.connect_search_index().await?;

        let stats_registry = StatsRegistry::new();
        let database = Arc::new(InterceptedDatabase::new(
            self.collaborators.database.clone(),
            stats_registry.clone(),
        ));
        stats_registry.claim(
            database.tag(),
            RunHandle {
                stats: stats.clone(),
                dry_run: self.config.dry_run,
            },
        );
        let _claim = ClaimGuard {
            registry: stats_registry,
            tag: database.tag(),
        };

        // ReadingHistory
        let history = HistoryStore::new(database.as_ref(), self.config.collection.clone());
        let latest = history.latest().await?;
        if let Some(record) = &latest {
            if !record.success {
                return Err(MigrateError::DirtyHistory {
                    version: record.version.clone(),
                });
            }
        }

        let pending = pending_set(candidates, latest.as_ref())?;
        if pending.is_empty() {
            tracing::info!("no pending migrations");
            return Ok(stats.snapshot());
        }

        let mut next_rank = latest.map(|r| r.installed_rank + 1).unwrap_or(0);
        for migration in &pending {
            self.run_one(migration, next_rank, &history, &stats, &identity, database.clone(), search.clone())
                .await?;
            next_rank += 1;
        }

        let snapshot = stats.snapshot();
        tracing::info!(
            executed = snapshot.executed_files,
            dry_run = self.config.dry_run,
            "migration run finished"
        );
        Ok(snapshot)
    }

    async fn authenticate(&self) -> MigrateResult<Identity> {
        match &self.config.impersonate {
            Some(principal) => {
                self.collaborators
                    .credentials
                    .impersonate(principal, DEFAULT_SCOPES, self.config.token_lifetime)
                    .await
            }
            None => self.collaborators.credentials.direct(DEFAULT_SCOPES).await,
        }
    }

    async fn connect_search_index(&self) -> MigrateResult<Arc<dyn SearchIndex>> {
        let Some(secret_name) = &self.config.index_secret else {
            return Ok(Arc::new(NoSearchIndex));
        };
        let payload = self.collaborators.secrets.latest(secret_name).await?;
        let creds: IndexCredentials =
            serde_json::from_slice(&payload).map_err(|e| MigrateError::Secret {
                message: format!("secret '{}' is not valid index credentials: {}", secret_name, e),
            })?;
        let endpoint = url::Url::parse(&creds.endpoint).map_err(|e| MigrateError::SearchIndex {
            message: format!("invalid index endpoint '{}': {}", creds.endpoint, e),
        })?;
        self.collaborators.search.connect(&endpoint, &creds.api_key)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_one(
        &self,
        migration: &MigrationFile,
        rank: i64,
        history: &HistoryStore<'_>,
        stats: &Arc<StatsCell>,
        identity: &Identity,
        database: Arc<InterceptedDatabase>,
        search: Arc<dyn SearchIndex>,
    ) -> MigrateResult<()> {
        // Preparing: both the entry point and the file bytes must load
        // before the migration counts as attempted.
        let script = self.registry.resolve(&migration.filename)?;
        let bytes = fs::read(&migration.path).map_err(|e| MigrateError::File {
            file: migration.path.display().to_string(),
            source: e,
        })?;
        let checksum = hex::encode(Sha256::digest(&bytes));

        // Running
        tracing::info!(
            script = %migration.filename,
            version = %migration.version,
            dry_run = self.config.dry_run,
            "running migration"
        );
        let tracker = WorkTracker::new();
        let ctx = MigrateContext::new(
            database,
            search,
            self.collaborators.secrets.clone(),
            self.config.project_id.clone(),
            identity.clone(),
            self.config.dry_run,
            tracker.spawner(),
        );

        let started = Utc::now();
        let timer = Instant::now();
        let mut result = script.run(&ctx).await;
        if result.is_ok() {
            if let Some(err) = tracker.settle(self.config.force_wait).await {
                result = Err(err);
            }
        }
        let execution_time_ms = timer.elapsed().as_millis() as i64;
        let success = result.is_ok();
        if let Err(err) = &result {
            tracing::error!(script = %migration.filename, error = %format!("{:#}", err), "migration failed");
        }
        stats.record_executed();

        // Recording: the engine's own bookkeeping write is never counted
        let record = HistoryRecord {
            installed_rank: rank,
            version: migration.version.to_string(),
            description: migration.description.clone(),
            script: migration.filename.clone(),
            script_type: script_type(&migration.filename),
            checksum,
            installed_by: identity.principal.clone(),
            installed_on: started,
            execution_time_ms,
            success,
        };
        stats.freeze();
        let appended = history.append(&record).await;
        stats.unfreeze();
        appended?;

        if !success {
            return Err(MigrateError::MigrationFailed {
                script: migration.filename.clone(),
            });
        }
        Ok(())
    }
}

/// Discard candidates at or below the latest successful version, then sort
/// ascending
fn pending_set(
    candidates: Vec<MigrationFile>,
    latest: Option<&HistoryRecord>,
) -> MigrateResult<Vec<MigrationFile>> {
    let floor = match latest {
        Some(record) => Some(Version::coerce(&record.version).ok_or_else(|| {
            MigrateError::Database {
                message: format!("unparseable version '{}' in history", record.version),
            }
        })?),
        None => None,
    };

    let mut pending: Vec<MigrationFile> = candidates
        .into_iter()
        .filter(|m| match &floor {
            Some(latest) => m.version > *latest,
            None => true,
        })
        .collect();
    pending.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(pending)
}
