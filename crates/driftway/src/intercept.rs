//! Write interception
//!
//! [`InterceptedDatabase`] decorates a backend client so every mutating call
//! a migration script issues is observed and counted, and under dry run is
//! suppressed before it reaches the network. Scripts call it through the
//! plain [`DocumentDatabase`] trait and never know they are being watched.
//!
//! Each instance is stamped with a process-unique tag at construction; the
//! [`StatsRegistry`] maps tags to active runs. An instance no run has
//! claimed passes every call through unmodified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::backends::core::{
    Document, DocumentDatabase, DocumentPath, Query, StoredDocument, WriteBatch, WriteOutcome,
};
use crate::error::MigrateResult;
use crate::stats::{RunHandle, StatsRegistry, WriteKind};

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Decorator around a document database client
pub struct InterceptedDatabase {
    inner: Arc<dyn DocumentDatabase>,
    registry: StatsRegistry,
    tag: u64,
}

impl InterceptedDatabase {
    pub fn new(inner: Arc<dyn DocumentDatabase>, registry: StatsRegistry) -> Self {
        Self {
            inner,
            registry,
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The tag a run claims in the registry to own this instance
    pub fn tag(&self) -> u64 {
        self.tag
    }

    fn owner(&self) -> Option<RunHandle> {
        self.registry.owner(self.tag)
    }

    fn observe(run: &RunHandle, kind: WriteKind, target: &str, doc: Option<&Document>) {
        if run.stats.is_frozen() {
            return;
        }
        run.stats.count(kind);
        let rendered = doc
            .map(|d| serde_json::to_string(d).unwrap_or_else(|_| "<unserializable>".to_string()))
            .unwrap_or_default();
        tracing::debug!(op = kind.as_str(), path = target, doc = %rendered, "intercepted write");
    }
}

#[async_trait]
impl DocumentDatabase for InterceptedDatabase {
    async fn create(&self, path: &DocumentPath, doc: &Document) -> MigrateResult<WriteOutcome> {
        match self.owner() {
            None => self.inner.create(path, doc).await,
            Some(run) => {
                Self::observe(&run, WriteKind::Created, &path.to_string(), Some(doc));
                if run.dry_run {
                    Ok(WriteOutcome::suppressed())
                } else {
                    self.inner.create(path, doc).await
                }
            }
        }
    }

    async fn set(
        &self,
        path: &DocumentPath,
        doc: &Document,
        merge: bool,
    ) -> MigrateResult<WriteOutcome> {
        match self.owner() {
            None => self.inner.set(path, doc, merge).await,
            Some(run) => {
                Self::observe(&run, WriteKind::Set, &path.to_string(), Some(doc));
                if run.dry_run {
                    Ok(WriteOutcome::suppressed())
                } else {
                    self.inner.set(path, doc, merge).await
                }
            }
        }
    }

    async fn update(&self, path: &DocumentPath, fields: &Document) -> MigrateResult<WriteOutcome> {
        match self.owner() {
            None => self.inner.update(path, fields).await,
            Some(run) => {
                Self::observe(&run, WriteKind::Updated, &path.to_string(), Some(fields));
                if run.dry_run {
                    Ok(WriteOutcome::suppressed())
                } else {
                    self.inner.update(path, fields).await
                }
            }
        }
    }

    async fn delete(&self, path: &DocumentPath) -> MigrateResult<WriteOutcome> {
        match self.owner() {
            None => self.inner.delete(path).await,
            Some(run) => {
                Self::observe(&run, WriteKind::Deleted, &path.to_string(), None);
                if run.dry_run {
                    Ok(WriteOutcome::suppressed())
                } else {
                    self.inner.delete(path).await
                }
            }
        }
    }

    async fn add(&self, collection: &str, doc: &Document) -> MigrateResult<DocumentPath> {
        match self.owner() {
            None => self.inner.add(collection, doc).await,
            Some(run) => {
                // Counted once as an add; the inner client's internal
                // create-with-generated-id is invoked directly so it is
                // never counted a second time.
                Self::observe(&run, WriteKind::Added, collection, Some(doc));
                if run.dry_run {
                    Ok(DocumentPath::new(collection, uuid::Uuid::new_v4().to_string()))
                } else {
                    self.inner.add(collection, doc).await
                }
            }
        }
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(InterceptedBatch {
            inner: self.inner.batch(),
            registry: self.registry.clone(),
            tag: self.tag,
            pending: Vec::new(),
        })
    }

    async fn query(&self, query: &Query) -> MigrateResult<Vec<StoredDocument>> {
        self.inner.query(query).await
    }
}

struct PendingAction {
    kind: WriteKind,
    target: String,
    rendered: Option<Document>,
}

/// Batch decorator: queued operations defer their stat/log actions until the
/// commit, and a dry-run commit performs nothing and counts nothing
struct InterceptedBatch {
    inner: Box<dyn WriteBatch>,
    registry: StatsRegistry,
    tag: u64,
    pending: Vec<PendingAction>,
}

impl InterceptedBatch {
    fn defer(&mut self, kind: WriteKind, target: String, rendered: Option<Document>) {
        self.pending.push(PendingAction {
            kind,
            target,
            rendered,
        });
    }
}

#[async_trait]
impl WriteBatch for InterceptedBatch {
    fn create(&mut self, path: &DocumentPath, doc: &Document) {
        self.inner.create(path, doc);
        self.defer(WriteKind::Created, path.to_string(), Some(doc.clone()));
    }

    fn set(&mut self, path: &DocumentPath, doc: &Document, merge: bool) {
        self.inner.set(path, doc, merge);
        self.defer(WriteKind::Set, path.to_string(), Some(doc.clone()));
    }

    fn update(&mut self, path: &DocumentPath, fields: &Document) {
        self.inner.update(path, fields);
        self.defer(WriteKind::Updated, path.to_string(), Some(fields.clone()));
    }

    fn delete(&mut self, path: &DocumentPath) {
        self.inner.delete(path);
        self.defer(WriteKind::Deleted, path.to_string(), None);
    }

    async fn commit(self: Box<Self>) -> MigrateResult<Vec<WriteOutcome>> {
        let Some(run) = self.registry.owner(self.tag) else {
            return self.inner.commit().await;
        };

        if run.dry_run {
            return Ok(self
                .pending
                .iter()
                .map(|_| WriteOutcome::suppressed())
                .collect());
        }

        let outcomes = self.inner.commit().await?;
        for action in &self.pending {
            InterceptedDatabase::observe(
                &run,
                action.kind,
                &action.target,
                action.rendered.as_ref(),
            );
        }
        Ok(outcomes)
    }
}
