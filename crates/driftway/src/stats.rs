//! Per-run statistics and the run-ownership registry
//!
//! Each `migrate()` invocation owns one [`StatsCell`]; the write interceptor
//! finds it through a [`StatsRegistry`] entry keyed by the tag stamped onto
//! the intercepted client at construction time. Keyed isolation keeps
//! concurrent invocations within one process from mixing counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Run summary returned to the caller of `migrate()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub scanned_files: u64,
    pub executed_files: u64,
    pub created: u64,
    pub set: u64,
    pub updated: u64,
    pub deleted: u64,
    pub added: u64,
}

/// Mutation kinds the interceptor counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Set,
    Updated,
    Deleted,
    Added,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Created => "created",
            WriteKind::Set => "set",
            WriteKind::Updated => "updated",
            WriteKind::Deleted => "deleted",
            WriteKind::Added => "added",
        }
    }
}

/// Live counters for one invocation
#[derive(Default)]
pub struct StatsCell {
    scanned_files: AtomicU64,
    executed_files: AtomicU64,
    created: AtomicU64,
    set: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    added: AtomicU64,
    frozen: AtomicBool,
}

impl StatsCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_scanned(&self, count: u64) {
        self.scanned_files.store(count, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, kind: WriteKind) {
        let counter = match kind {
            WriteKind::Created => &self.created,
            WriteKind::Set => &self.set,
            WriteKind::Updated => &self.updated,
            WriteKind::Deleted => &self.deleted,
            WriteKind::Added => &self.added,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// While frozen, intercepted writes are neither counted nor logged.
    /// The engine freezes stats around its own history bookkeeping.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn unfreeze(&self) {
        self.frozen.store(false, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunStats {
        RunStats {
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            executed_files: self.executed_files.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            set: self.set.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
        }
    }
}

/// State the registry associates with one active run
#[derive(Clone)]
pub struct RunHandle {
    pub stats: Arc<StatsCell>,
    pub dry_run: bool,
}

/// Map from client-instance tag to the run that owns it.
///
/// Created by the execution pipeline, shared with every interceptor it
/// constructs, and emptied again when the run ends.
#[derive(Default, Clone)]
pub struct StatsRegistry {
    runs: Arc<DashMap<u64, RunHandle>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, tag: u64, handle: RunHandle) {
        self.runs.insert(tag, handle);
    }

    pub fn release(&self, tag: u64) {
        self.runs.remove(&tag);
    }

    /// The run owning `tag`, if any; unclaimed tags pass through unobserved
    pub fn owner(&self, tag: u64) -> Option<RunHandle> {
        self.runs.get(&tag).map(|entry| entry.value().clone())
    }
}
