//! Error types for the migration engine

use thiserror::Error;

/// Result type alias for engine operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors surfaced by the migration engine
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Migration filename has a version but no description token
    #[error("Invalid migration filename '{filename}': expected <version>__<description>.<ext>")]
    BadFilename { filename: String },

    /// Two candidate files coerce to the same version
    #[error("Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// Migration directory missing or unreadable
    #[error("Failed to read migration directory '{dir}': {source}")]
    Directory {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    /// Migration file could not be read for checksumming
    #[error("Failed to read migration file '{file}': {source}")]
    File {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Credential acquisition failed
    #[error("Credential error: {message}")]
    Credentials { message: String },

    /// Secret retrieval failed
    #[error("Secret error: {message}")]
    Secret { message: String },

    /// Search-index client construction or call failed
    #[error("Search index error: {message}")]
    SearchIndex { message: String },

    /// Backend database operation failed
    #[error("Database error: {message}")]
    Database { message: String },

    /// The latest history record is marked failed; the target is in an
    /// unknown state and the engine refuses to proceed
    #[error(
        "Migration {version} failed on a previous run; restore from backup and roll back the \
         history collection before migrating again"
    )]
    DirtyHistory { version: String },

    /// A scanned migration file has no registered entry point
    #[error("No entry point registered for migration script '{script}'")]
    ScriptNotFound { script: String },

    /// A plugin could not be loaded
    #[error("Failed to load plugin '{plugin}': {message}")]
    Plugin { plugin: String, message: String },

    /// A migration failed; its history record was written first
    #[error("Stopped at first failed migration: {script}")]
    MigrationFailed { script: String },

    /// Serialization of a history record or document failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
