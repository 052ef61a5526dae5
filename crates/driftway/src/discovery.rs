//! Migration file discovery
//!
//! Scans a directory for migration scripts and builds the candidate set.
//! The set is unsorted; version ordering is the runner's job.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, MigrateResult};
use crate::version::{parse_filename, Version};

/// A candidate migration discovered on disk
#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub filename: String,
    pub path: PathBuf,
    pub version: Version,
    pub description: String,
}

/// List immediate entries of `dir` and collect every well-formed migration
/// file. Subdirectories are excluded. Duplicate versions fail the whole scan
/// with no partial results.
pub fn scan_directory(dir: &Path) -> MigrateResult<Vec<MigrationFile>> {
    let entries = fs::read_dir(dir).map_err(|e| MigrateError::Directory {
        dir: dir.display().to_string(),
        source: e,
    })?;

    let mut files = Vec::new();
    let mut seen: HashMap<Version, String> = HashMap::new();

    for entry in entries {
        let entry = entry.map_err(|e| MigrateError::Directory {
            dir: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();

        let Some(parsed) = parse_filename(&filename)? else {
            continue;
        };

        if let Some(first) = seen.insert(parsed.version.clone(), filename.clone()) {
            return Err(MigrateError::DuplicateVersion {
                version: parsed.version.to_string(),
                first,
                second: filename,
            });
        }

        files.push(MigrationFile {
            filename,
            path,
            version: parsed.version,
            description: parsed.description,
        });
    }

    tracing::debug!(dir = %dir.display(), count = files.len(), "scanned migration directory");
    Ok(files)
}
