//! Pending-work tracking
//!
//! A migration that starts asynchronous work and returns without awaiting it
//! is a silent data-loss hazard. The engine opens a [`WorkTracker`] session
//! around each migration's entry point and hands the script a
//! [`TrackedSpawner`]: only work started through the spawner (the marked
//! execution scope) is tracked, so the engine's own infrastructure never
//! produces false positives.
//!
//! After the entry point resolves, [`WorkTracker::settle`] waits out a short
//! grace delay so late-surfacing errors can arrive, then either blocks until
//! the tracked set empties (force wait, no timeout) or logs a single
//! debug-level notice listing each outstanding operation's source location. Any error or panic captured
//! from tracked work is reported as the migration's own failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// Grace window after the entry point settles, for errors that surface late
const GRACE_DELAY: Duration = Duration::from_millis(50);

struct TrackerShared {
    next_id: AtomicU64,
    outstanding: Mutex<HashMap<u64, String>>,
    failure: Mutex<Option<anyhow::Error>>,
    settled: Notify,
}

impl TrackerShared {
    fn complete(&self, id: u64) {
        self.outstanding.lock().unwrap().remove(&id);
        self.settled.notify_waiters();
    }

    /// First captured failure wins; later ones are logged and dropped
    fn capture(&self, err: anyhow::Error) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!(error = %err, "additional asynchronous failure ignored");
        }
    }
}

/// Tracking session for one migration's execution window
pub struct WorkTracker {
    shared: Arc<TrackerShared>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                next_id: AtomicU64::new(0),
                outstanding: Mutex::new(HashMap::new()),
                failure: Mutex::new(None),
                settled: Notify::new(),
            }),
        }
    }

    /// Spawner handed to the migration context
    pub fn spawner(&self) -> TrackedSpawner {
        TrackedSpawner {
            shared: self.shared.clone(),
        }
    }

    /// Source locations of operations still in flight
    pub fn outstanding(&self) -> Vec<String> {
        let mut locations: Vec<String> = self
            .shared
            .outstanding
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        locations.sort();
        locations
    }

    /// Close the session after the entry point's result has resolved.
    ///
    /// Returns the first asynchronous failure observed during the window, if
    /// any; a captured failure takes precedence over force-wait completion.
    pub async fn settle(&self, force_wait: bool) -> Option<anyhow::Error> {
        tokio::time::sleep(GRACE_DELAY).await;

        if let Some(err) = self.shared.failure.lock().unwrap().take() {
            return Some(err);
        }

        let outstanding = self.outstanding();
        if !outstanding.is_empty() {
            if force_wait {
                tracing::info!(
                    count = outstanding.len(),
                    "waiting for outstanding asynchronous operations to settle"
                );
                loop {
                    let notified = self.shared.settled.notified();
                    if self.shared.outstanding.lock().unwrap().is_empty() {
                        break;
                    }
                    notified.await;
                }
            } else {
                // Soft warning, surfaced only when debug logging is enabled.
                tracing::debug!(
                    operations = ?outstanding,
                    "migration returned with asynchronous operations still pending; \
                     they may not have completed (use force-wait to block on them)"
                );
            }
        }

        self.shared.failure.lock().unwrap().take()
    }
}

impl Default for WorkTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle scripts use to start tracked asynchronous work
#[derive(Clone)]
pub struct TrackedSpawner {
    shared: Arc<TrackerShared>,
}

impl TrackedSpawner {
    /// Start an asynchronous operation within the tracked scope.
    ///
    /// The operation is keyed by an opaque id and the caller's source
    /// location, and leaves the tracked set when it settles. An `Err` or a
    /// panic is captured and reported as the migration's failure.
    #[track_caller]
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let location = std::panic::Location::caller().to_string();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .outstanding
            .lock()
            .unwrap()
            .insert(id, location.clone());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            // Nested task so a panic surfaces as a JoinError here instead of
            // tearing down this wrapper.
            let result = tokio::spawn(fut).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => shared.capture(err.context(format!("spawned at {}", location))),
                Err(join) => shared.capture(anyhow::anyhow!(
                    "operation spawned at {} panicked: {}",
                    location,
                    join
                )),
            }
            shared.complete(id);
        });
    }
}
