//! End-to-end pipeline tests against the in-memory backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use driftway::backends::memory::{
    MemoryDatabase, MemorySearchIndexFactory, MemorySecretStore, StaticCredentials,
};
use driftway::{
    Collaborators, Document, DocumentPath, HistoryRecord, HistoryStore, MigrateConfig,
    MigrateError, MigrationRunner, ScriptRegistry, DEFAULT_COLLECTION,
};

fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

struct Harness {
    dir: TempDir,
    db: MemoryDatabase,
    secrets: MemorySecretStore,
    search: MemorySearchIndexFactory,
    registry: ScriptRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            db: MemoryDatabase::new(),
            secrets: MemorySecretStore::new(),
            search: MemorySearchIndexFactory::default(),
            registry: ScriptRegistry::new(),
        }
    }

    fn write_script(&self, name: &str, content: &str) {
        std::fs::write(self.dir.path().join(name), content).unwrap();
    }

    fn config(&self) -> MigrateConfig {
        MigrateConfig {
            dir: self.dir.path().to_path_buf(),
            project_id: "test-project".to_string(),
            ..MigrateConfig::default()
        }
    }

    // Borrows the harness so the temporary migrations directory outlives
    // the returned runner; the in-memory collaborators share state through
    // their internal `Arc`s.
    fn runner(&mut self, config: MigrateConfig) -> MigrationRunner {
        let collaborators = Collaborators {
            database: Arc::new(self.db.clone()),
            secrets: Arc::new(self.secrets.clone()),
            search: Arc::new(self.search.clone()),
            credentials: Arc::new(StaticCredentials::new("migrator@test")),
        };
        MigrationRunner::new(config, collaborators, std::mem::take(&mut self.registry))
    }

    fn run_default(&mut self) -> MigrationRunner {
        let config = self.config();
        self.runner(config)
    }

    async fn seed_history(&self, rank: i64, version: &str, success: bool) {
        let store = HistoryStore::new(&self.db, DEFAULT_COLLECTION);
        store
            .append(&HistoryRecord {
                installed_rank: rank,
                version: version.to_string(),
                description: "seed".to_string(),
                script: format!("v{}__seed.rs", version),
                script_type: "rs".to_string(),
                checksum: "00".to_string(),
                installed_by: "seeder".to_string(),
                installed_on: chrono::Utc::now(),
                execution_time_ms: 1,
                success,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn executes_pending_migrations_in_version_order() {
    let mut harness = Harness::new();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    for (file, tag) in [
        ("v1.0.0__first.rs", "1.0.0"),
        ("v1.2.0__third.rs", "1.2.0"),
        ("v1.1.0__second.rs", "1.1.0"),
    ] {
        harness.write_script(file, tag);
        let order = order.clone();
        harness.registry.register_fn(file, move |_ctx| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(tag);
                Ok(())
            }
        });
    }

    let db = harness.db.clone();
    let stats = harness.run_default().migrate().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["1.0.0", "1.1.0", "1.2.0"]);
    assert_eq!(stats.scanned_files, 3);
    assert_eq!(stats.executed_files, 3);

    // Gap-free ranks under naturally-ordered keys.
    let history = db.collection(DEFAULT_COLLECTION);
    let keys: Vec<&str> = history.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        vec!["0-1.0.0-first", "1-1.1.0-second", "2-1.2.0-third"]
    );
    assert!(history.iter().all(|(_, doc)| doc["success"] == json!(true)));
}

#[tokio::test]
async fn duplicate_versions_abort_with_nothing_executed() {
    let mut harness = Harness::new();
    harness.write_script("v2.0.0__one.rs", "");
    harness.write_script("2.0.0__two.rs", "");
    harness.registry.register_fn("v2.0.0__one.rs", |_ctx| async { Ok(()) });
    harness.registry.register_fn("2.0.0__two.rs", |_ctx| async { Ok(()) });

    let db = harness.db.clone();
    let err = harness.run_default().migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::DuplicateVersion { .. }));
    assert!(db.collection(DEFAULT_COLLECTION).is_empty());
}

#[tokio::test]
async fn skips_versions_already_recorded() {
    let mut harness = Harness::new();
    harness.seed_history(0, "1.0.0", true).await;
    harness.write_script("v1.0.0__old.rs", "");
    harness.write_script("v2.0.0__new.rs", "");

    let ran_old = Arc::new(AtomicBool::new(false));
    let flag = ran_old.clone();
    harness.registry.register_fn("v1.0.0__old.rs", move |_ctx| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    harness.registry.register_fn("v2.0.0__new.rs", |_ctx| async { Ok(()) });

    let db = harness.db.clone();
    let stats = harness.run_default().migrate().await.unwrap();

    assert!(!ran_old.load(Ordering::SeqCst));
    assert_eq!(stats.executed_files, 1);
    let history = db.collection(DEFAULT_COLLECTION);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].0, "1-2.0.0-new");
}

#[tokio::test]
async fn failed_history_record_locks_the_target() {
    let mut harness = Harness::new();
    harness.seed_history(0, "1.0.0", false).await;
    harness.write_script("v2.0.0__next.rs", "");

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    harness.registry.register_fn("v2.0.0__next.rs", move |_ctx| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    let err = harness.run_default().migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::DirtyHistory { .. }));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn dry_run_counts_writes_but_persists_nothing() {
    async fn one_dry_run() -> (driftway::RunStats, MemoryDatabase) {
        let mut harness = Harness::new();
        harness.write_script("v1.0.0__writes.rs", "body");
        harness.registry.register_fn("v1.0.0__writes.rs", |ctx| async move {
            let path = DocumentPath::new("users", "a");
            ctx.database.create(&path, &doc(&[("n", json!(1))])).await?;
            ctx.database.set(&path, &doc(&[("n", json!(2))]), false).await?;
            Ok(())
        });

        let db = harness.db.clone();
        let config = MigrateConfig {
            dry_run: true,
            ..harness.config()
        };
        let stats = harness.runner(config).migrate().await.unwrap();
        (stats, db)
    }

    let (first, db_first) = one_dry_run().await;
    let (second, db_second) = one_dry_run().await;

    assert_eq!(first, second);
    assert_eq!(first.created, 1);
    assert_eq!(first.set, 1);
    for db in [db_first, db_second] {
        assert!(db.collection("users").is_empty());
        assert!(db.collection(DEFAULT_COLLECTION).is_empty());
    }
}

#[tokio::test]
async fn stats_count_user_writes_but_not_the_history_record() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__mixed.rs", "");
    harness.registry.register_fn("v1.0.0__mixed.rs", |ctx| async move {
        let a = DocumentPath::new("users", "a");
        let b = DocumentPath::new("users", "b");
        ctx.database.create(&a, &doc(&[("n", json!(1))])).await?;
        ctx.database.set(&a, &doc(&[("n", json!(2))]), false).await?;
        ctx.database.set(&b, &doc(&[("m", json!(1))]), true).await?;
        ctx.database.update(&a, &doc(&[("n", json!(3))])).await?;
        ctx.database.delete(&b).await?;
        ctx.database.add("users", &doc(&[("n", json!(4))])).await?;
        Ok(())
    });

    let db = harness.db.clone();
    let stats = harness.run_default().migrate().await.unwrap();

    assert_eq!(stats.created, 1);
    assert_eq!(stats.set, 2);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.added, 1);
    // The engine's own bookkeeping write persisted but was not counted.
    assert_eq!(db.collection(DEFAULT_COLLECTION).len(), 1);
}

#[tokio::test]
async fn failing_entry_point_records_history_before_erroring() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__broken.rs", "");
    harness
        .registry
        .register_fn("v1.0.0__broken.rs", |_ctx| async {
            Err(anyhow::anyhow!("bad data"))
        });

    let db = harness.db.clone();
    let err = harness.run_default().migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::MigrationFailed { .. }));
    let history = db.collection(DEFAULT_COLLECTION);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].1["success"], json!(false));
}

#[tokio::test]
async fn missing_entry_point_aborts_with_no_record() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__orphan.rs", "");

    let db = harness.db.clone();
    let err = harness.run_default().migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::ScriptNotFound { .. }));
    assert!(db.collection(DEFAULT_COLLECTION).is_empty());
}

#[tokio::test]
async fn captured_asynchronous_error_fails_the_migration() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__leaky.rs", "");
    harness.registry.register_fn("v1.0.0__leaky.rs", |ctx| async move {
        ctx.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow::anyhow!("background write rejected"))
        });
        Ok(())
    });

    let db = harness.db.clone();
    let err = harness.run_default().migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::MigrationFailed { .. }));
    assert_eq!(db.collection(DEFAULT_COLLECTION)[0].1["success"], json!(false));
}

#[tokio::test]
async fn unawaited_work_proceeds_without_force_wait() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__slow.rs", "");
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    harness.registry.register_fn("v1.0.0__slow.rs", move |ctx| {
        let flag = flag.clone();
        async move {
            ctx.spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }
    });

    let db = harness.db.clone();
    let stats = harness.run_default().migrate().await.unwrap();

    assert_eq!(stats.executed_files, 1);
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(db.collection(DEFAULT_COLLECTION)[0].1["success"], json!(true));
}

#[tokio::test]
async fn force_wait_blocks_until_unawaited_work_settles() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__slow.rs", "");
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    harness.registry.register_fn("v1.0.0__slow.rs", move |ctx| {
        let flag = flag.clone();
        async move {
            ctx.spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }
    });

    let config = MigrateConfig {
        force_wait: true,
        ..harness.config()
    };
    harness.runner(config).migrate().await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn history_record_carries_checksum_and_identity() {
    let mut harness = Harness::new();
    let body = "migrate the users collection";
    harness.write_script("v1.0.0__checksummed.rs", body);
    harness
        .registry
        .register_fn("v1.0.0__checksummed.rs", |_ctx| async { Ok(()) });

    let db = harness.db.clone();
    harness.run_default().migrate().await.unwrap();

    let record = &db.collection(DEFAULT_COLLECTION)[0].1;
    assert_eq!(
        record["checksum"],
        json!(hex::encode(Sha256::digest(body.as_bytes())))
    );
    assert_eq!(record["installed_by"], json!("migrator@test"));
    assert_eq!(record["type"], json!("rs"));
    assert_eq!(record["script"], json!("v1.0.0__checksummed.rs"));
}

#[tokio::test]
async fn search_index_is_built_from_the_named_secret() {
    let mut harness = Harness::new();
    harness.secrets.insert(
        "search-admin",
        json!({ "endpoint": "https://search.example.com", "api_key": "k1" })
            .to_string()
            .into_bytes(),
    );
    harness.write_script("v1.0.0__reindex.rs", "");
    harness.registry.register_fn("v1.0.0__reindex.rs", |ctx| async move {
        ctx.search.upsert("users", "a", &doc(&[])).await?;
        Ok(())
    });

    let index = harness.search.index();
    let config = MigrateConfig {
        index_secret: Some("search-admin".to_string()),
        ..harness.config()
    };
    harness.runner(config).migrate().await.unwrap();

    assert_eq!(index.operations(), vec!["upsert users/a"]);
}

#[tokio::test]
async fn missing_index_secret_aborts_before_any_attempt() {
    let mut harness = Harness::new();
    harness.write_script("v1.0.0__reindex.rs", "");
    harness.registry.register_fn("v1.0.0__reindex.rs", |_ctx| async { Ok(()) });

    let db = harness.db.clone();
    let config = MigrateConfig {
        index_secret: Some("absent".to_string()),
        ..harness.config()
    };
    let err = harness.runner(config).migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::Secret { .. }));
    assert!(db.collection(DEFAULT_COLLECTION).is_empty());
}

#[tokio::test]
async fn concurrent_invocations_keep_separate_stats() {
    fn build(writes: usize) -> (Harness, MigrationRunner) {
        let mut harness = Harness::new();
        harness.write_script("v1.0.0__load.rs", "");
        harness.registry.register_fn("v1.0.0__load.rs", move |ctx| async move {
            for i in 0..writes {
                ctx.database
                    .set(
                        &DocumentPath::new("items", i.to_string()),
                        &doc(&[("i", json!(i))]),
                        false,
                    )
                    .await?;
            }
            Ok(())
        });
        let config = harness.config();
        let runner = harness.runner(config);
        (harness, runner)
    }

    let (_harness_a, runner_a) = build(2);
    let (_harness_b, runner_b) = build(5);
    let (a, b) = tokio::join!(runner_a.migrate(), runner_b.migrate());

    assert_eq!(a.unwrap().set, 2);
    assert_eq!(b.unwrap().set, 5);
}

#[tokio::test]
async fn successful_run_skips_everything_on_the_next_invocation() {
    fn build(db: MemoryDatabase, dir: &std::path::Path) -> MigrationRunner {
        let mut registry = ScriptRegistry::new();
        registry.register_fn("v1.0.0__init.rs", |_ctx| async { Ok(()) });
        let collaborators = Collaborators {
            database: Arc::new(db),
            secrets: Arc::new(MemorySecretStore::new()),
            search: Arc::new(MemorySearchIndexFactory::default()),
            credentials: Arc::new(StaticCredentials::new("migrator@test")),
        };
        let config = MigrateConfig {
            dir: dir.to_path_buf(),
            ..MigrateConfig::default()
        };
        MigrationRunner::new(config, collaborators, registry)
    }

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("v1.0.0__init.rs"), "").unwrap();
    let db = MemoryDatabase::new();

    let first = build(db.clone(), dir.path()).migrate().await.unwrap();
    assert_eq!(first.executed_files, 1);

    let second = build(db.clone(), dir.path()).migrate().await.unwrap();
    assert_eq!(second.executed_files, 0);
    assert_eq!(db.collection(DEFAULT_COLLECTION).len(), 1);
}
