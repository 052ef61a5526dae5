//! History store adapter
//!
//! One append-only, strictly-ordered collection in the target database holds
//! an audit record per executed migration. The adapter reads the latest
//! record and appends new ones; version comparison and rank computation stay
//! in the runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backends::core::{
    Direction, Document, DocumentDatabase, DocumentPath, Query, WriteOutcome,
};
use crate::error::{MigrateError, MigrateResult};

/// Default name of the history collection
pub const DEFAULT_COLLECTION: &str = "driftway";

/// Durable audit entry for one executed migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Gap-free increasing sequence starting at 0
    pub installed_rank: i64,
    pub version: String,
    pub description: String,
    /// Script filename
    pub script: String,
    /// Script file extension
    #[serde(rename = "type")]
    pub script_type: String,
    /// Hex sha-256 over the script file's raw bytes
    pub checksum: String,
    /// Identity of the invoking user or process
    pub installed_by: String,
    pub installed_on: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub success: bool,
}

impl HistoryRecord {
    /// Naturally-ordered, human-readable document key
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.installed_rank, self.version, self.description
        )
    }
}

/// Adapter over the history collection
pub struct HistoryStore<'a> {
    database: &'a dyn DocumentDatabase,
    collection: String,
}

impl<'a> HistoryStore<'a> {
    pub fn new(database: &'a dyn DocumentDatabase, collection: impl Into<String>) -> Self {
        Self {
            database,
            collection: collection.into(),
        }
    }

    /// The record with the greatest installed rank, or `None` when the
    /// collection is empty
    pub async fn latest(&self) -> MigrateResult<Option<HistoryRecord>> {
        let docs = self
            .database
            .query(
                &Query::collection(self.collection.clone())
                    .order_by("installed_rank", Direction::Descending)
                    .limit(1),
            )
            .await?;

        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let record = serde_json::from_value(JsonValue::Object(doc.fields))?;
        Ok(Some(record))
    }

    /// Append a record under its composite key
    pub async fn append(&self, record: &HistoryRecord) -> MigrateResult<WriteOutcome> {
        let path = DocumentPath::new(self.collection.clone(), record.key());
        let JsonValue::Object(fields) = serde_json::to_value(record)? else {
            return Err(MigrateError::Database {
                message: "history record did not serialize to a document".to_string(),
            });
        };
        let fields: Document = fields;
        self.database.set(&path, &fields, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryDatabase;

    fn record(rank: i64, version: &str, success: bool) -> HistoryRecord {
        HistoryRecord {
            installed_rank: rank,
            version: version.to_string(),
            description: "init".to_string(),
            script: format!("v{}__init.rs", version),
            script_type: "rs".to_string(),
            checksum: "00".to_string(),
            installed_by: "tester".to_string(),
            installed_on: Utc::now(),
            execution_time_ms: 5,
            success,
        }
    }

    #[tokio::test]
    async fn latest_of_empty_history_is_none() {
        let db = MemoryDatabase::new();
        let store = HistoryStore::new(&db, DEFAULT_COLLECTION);
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_returns_highest_rank() {
        let db = MemoryDatabase::new();
        let store = HistoryStore::new(&db, DEFAULT_COLLECTION);
        store.append(&record(0, "1.0.0", true)).await.unwrap();
        store.append(&record(1, "1.1.0", true)).await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.installed_rank, 1);
        assert_eq!(latest.version, "1.1.0");
    }

    #[tokio::test]
    async fn records_are_keyed_by_rank_version_description() {
        let db = MemoryDatabase::new();
        let store = HistoryStore::new(&db, DEFAULT_COLLECTION);
        store.append(&record(0, "1.0.0", true)).await.unwrap();

        let docs = db.collection(DEFAULT_COLLECTION);
        assert_eq!(docs[0].0, "0-1.0.0-init");
    }
}
