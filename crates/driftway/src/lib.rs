//! # driftway: migration runner for remote document databases
//!
//! Discovers versioned migration scripts in a directory, applies the ones
//! not yet recorded in the target's history collection, and records an
//! auditable history entry per migration. Writes issued by migration code
//! are intercepted for statistics and, in dry-run mode, suppressed before
//! they reach the network; asynchronous work a migration starts but never
//! awaits is detected and reported.
//!
//! The external collaborators (document database, secret store, search
//! index, credential provider) are consumed through the capability traits
//! in [`backends`]; the engine assumes already-connected, correct clients.

pub mod backends;
pub mod discovery;
pub mod error;
pub mod history;
pub mod intercept;
pub mod pending;
pub mod runner;
pub mod script;
pub mod stats;
pub mod values;
pub mod version;

pub use backends::core::*;
pub use discovery::{scan_directory, MigrationFile};
pub use error::{MigrateError, MigrateResult};
pub use history::{HistoryRecord, HistoryStore, DEFAULT_COLLECTION};
pub use intercept::InterceptedDatabase;
pub use pending::{TrackedSpawner, WorkTracker};
pub use runner::{Collaborators, MigrateConfig, MigrationRunner};
pub use script::{load_plugin, MigrateContext, MigrationScript, Plugin, ScriptRegistry};
pub use stats::{RunStats, StatsRegistry};
pub use version::Version;
