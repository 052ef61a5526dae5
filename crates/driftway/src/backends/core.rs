//! Core backend capability traits
//!
//! These traits abstract the external collaborators the engine is handed:
//! the document database, the secret store, the search-index service, and
//! the credential provider. The engine assumes already-connected, correct
//! clients; it never manages their transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::MigrateResult;

/// A document body: field name to JSON value
pub type Document = serde_json::Map<String, JsonValue>;

/// Fully-qualified location of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Result of a single committed write. Dry-run writes return the empty
/// shape (`write_time: None`) so callers observing the result do not crash.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub write_time: Option<DateTime<Utc>>,
}

impl WriteOutcome {
    pub fn committed() -> Self {
        Self {
            write_time: Some(Utc::now()),
        }
    }

    pub fn suppressed() -> Self {
        Self::default()
    }
}

/// A stored document returned from a query
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: DocumentPath,
    pub fields: Document,
}

/// Sort direction for ordered queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// An ordered, limited query over one collection
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            order_by: None,
            limit: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Abstract document database client
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Create a document; fails if it already exists
    async fn create(&self, path: &DocumentPath, doc: &Document) -> MigrateResult<WriteOutcome>;

    /// Set a document, replacing it or merging into it
    async fn set(
        &self,
        path: &DocumentPath,
        doc: &Document,
        merge: bool,
    ) -> MigrateResult<WriteOutcome>;

    /// Update fields of an existing document; fails if it does not exist
    async fn update(&self, path: &DocumentPath, fields: &Document) -> MigrateResult<WriteOutcome>;

    /// Delete a document
    async fn delete(&self, path: &DocumentPath) -> MigrateResult<WriteOutcome>;

    /// Add a document to a collection under a generated id
    async fn add(&self, collection: &str, doc: &Document) -> MigrateResult<DocumentPath>;

    /// Start a batch of writes committed together
    fn batch(&self) -> Box<dyn WriteBatch>;

    /// Run an ordered, limited query
    async fn query(&self, query: &Query) -> MigrateResult<Vec<StoredDocument>>;
}

/// A queue of writes performed together by an explicit commit step
#[async_trait]
pub trait WriteBatch: Send {
    fn create(&mut self, path: &DocumentPath, doc: &Document);
    fn set(&mut self, path: &DocumentPath, doc: &Document, merge: bool);
    fn update(&mut self, path: &DocumentPath, fields: &Document);
    fn delete(&mut self, path: &DocumentPath);

    /// Perform every queued write
    async fn commit(self: Box<Self>) -> MigrateResult<Vec<WriteOutcome>>;
}

/// Secret-storage client: returns the latest version's payload for a named
/// secret
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn latest(&self, name: &str) -> MigrateResult<Vec<u8>>;
}

/// Search-index client handle passed opaquely to migration scripts
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, index: &str, id: &str, doc: &Document) -> MigrateResult<()>;
    async fn delete_object(&self, index: &str, id: &str) -> MigrateResult<()>;
}

/// Constructs a search-index client from an endpoint URL and an API key
pub trait SearchIndexFactory: Send + Sync {
    fn connect(&self, endpoint: &url::Url, api_key: &str) -> MigrateResult<Arc<dyn SearchIndex>>;
}

/// A scoped, time-limited access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// The authenticated identity a run executes as
#[derive(Debug, Clone)]
pub struct Identity {
    pub principal: String,
    pub token: AccessToken,
}

/// Credential provider supporting direct and impersonated identities
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire the process's own identity with the given scopes
    async fn direct(&self, scopes: &[&str]) -> MigrateResult<Identity>;

    /// Acquire a time-limited identity impersonating `principal`
    async fn impersonate(
        &self,
        principal: &str,
        scopes: &[&str],
        lifetime: Duration,
    ) -> MigrateResult<Identity>;
}
