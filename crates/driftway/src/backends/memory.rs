//! In-memory backend implementations
//!
//! Reference collaborators used by the test suite and by the CLI's local
//! mode. `MemoryDatabase` keeps collections as ordered maps so key order is
//! stable and human-inspectable, matching the naturally-ordered history keys.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::backends::core::{
    AccessToken, CredentialProvider, Direction, Document, DocumentDatabase, DocumentPath, Identity,
    Query, SearchIndex, SearchIndexFactory, SecretStore, StoredDocument, WriteBatch, WriteOutcome,
};
use crate::error::{MigrateError, MigrateResult};
use crate::values::sentinel_of;

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// In-memory document database
#[derive(Default, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<Collections>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot one collection's documents in key order
    pub fn collection(&self, name: &str) -> Vec<(String, Document)> {
        let state = self.state.lock().unwrap();
        state
            .get(name)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn apply(state: &mut Collections, op: &MemoryOp) -> MigrateResult<WriteOutcome> {
        match op {
            MemoryOp::Create { path, doc } => {
                let collection = state.entry(path.collection.clone()).or_default();
                if collection.contains_key(&path.id) {
                    return Err(MigrateError::Database {
                        message: format!("document {} already exists", path),
                    });
                }
                collection.insert(path.id.clone(), resolve_sentinels(doc, None));
                Ok(WriteOutcome::committed())
            }
            MemoryOp::Set { path, doc, merge } => {
                let collection = state.entry(path.collection.clone()).or_default();
                let base = if *merge {
                    collection.get(&path.id).cloned()
                } else {
                    None
                };
                collection.insert(path.id.clone(), resolve_sentinels(doc, base));
                Ok(WriteOutcome::committed())
            }
            MemoryOp::Update { path, fields } => {
                let collection = state.entry(path.collection.clone()).or_default();
                let Some(existing) = collection.get(&path.id).cloned() else {
                    return Err(MigrateError::Database {
                        message: format!("document {} does not exist", path),
                    });
                };
                collection.insert(path.id.clone(), resolve_sentinels(fields, Some(existing)));
                Ok(WriteOutcome::committed())
            }
            MemoryOp::Delete { path } => {
                if let Some(collection) = state.get_mut(&path.collection) {
                    collection.remove(&path.id);
                }
                Ok(WriteOutcome::committed())
            }
        }
    }
}

/// Merge `doc` over `base`, materializing sentinel values
fn resolve_sentinels(doc: &Document, base: Option<Document>) -> Document {
    let mut out = base.unwrap_or_default();
    for (field, value) in doc {
        match sentinel_of(value) {
            Some("delete") => {
                out.remove(field);
            }
            Some("server_timestamp") => {
                out.insert(field.clone(), JsonValue::String(Utc::now().to_rfc3339()));
            }
            _ => {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    out
}

enum MemoryOp {
    Create { path: DocumentPath, doc: Document },
    Set {
        path: DocumentPath,
        doc: Document,
        merge: bool,
    },
    Update { path: DocumentPath, fields: Document },
    Delete { path: DocumentPath },
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn create(&self, path: &DocumentPath, doc: &Document) -> MigrateResult<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        Self::apply(
            &mut state,
            &MemoryOp::Create {
                path: path.clone(),
                doc: doc.clone(),
            },
        )
    }

    async fn set(
        &self,
        path: &DocumentPath,
        doc: &Document,
        merge: bool,
    ) -> MigrateResult<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        Self::apply(
            &mut state,
            &MemoryOp::Set {
                path: path.clone(),
                doc: doc.clone(),
                merge,
            },
        )
    }

    async fn update(&self, path: &DocumentPath, fields: &Document) -> MigrateResult<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        Self::apply(
            &mut state,
            &MemoryOp::Update {
                path: path.clone(),
                fields: fields.clone(),
            },
        )
    }

    async fn delete(&self, path: &DocumentPath) -> MigrateResult<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        Self::apply(&mut state, &MemoryOp::Delete { path: path.clone() })
    }

    async fn add(&self, collection: &str, doc: &Document) -> MigrateResult<DocumentPath> {
        let path = DocumentPath::new(collection, uuid::Uuid::new_v4().to_string());
        self.create(&path, doc).await?;
        Ok(path)
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch {
            db: self.clone(),
            ops: Vec::new(),
        })
    }

    async fn query(&self, query: &Query) -> MigrateResult<Vec<StoredDocument>> {
        let state = self.state.lock().unwrap();
        let mut docs: Vec<StoredDocument> = state
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| StoredDocument {
                        path: DocumentPath::new(query.collection.clone(), id.clone()),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, direction)) = &query.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.fields.get(field), b.fields.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }
}

fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

struct MemoryBatch {
    db: MemoryDatabase,
    ops: Vec<MemoryOp>,
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    fn create(&mut self, path: &DocumentPath, doc: &Document) {
        self.ops.push(MemoryOp::Create {
            path: path.clone(),
            doc: doc.clone(),
        });
    }

    fn set(&mut self, path: &DocumentPath, doc: &Document, merge: bool) {
        self.ops.push(MemoryOp::Set {
            path: path.clone(),
            doc: doc.clone(),
            merge,
        });
    }

    fn update(&mut self, path: &DocumentPath, fields: &Document) {
        self.ops.push(MemoryOp::Update {
            path: path.clone(),
            fields: fields.clone(),
        });
    }

    fn delete(&mut self, path: &DocumentPath) {
        self.ops.push(MemoryOp::Delete { path: path.clone() });
    }

    async fn commit(self: Box<Self>) -> MigrateResult<Vec<WriteOutcome>> {
        // All queued writes apply under one lock acquisition.
        let mut state = self.db.state.lock().unwrap();
        let mut outcomes = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            outcomes.push(MemoryDatabase::apply(&mut state, op)?);
        }
        Ok(outcomes)
    }
}

/// In-memory secret store
#[derive(Default, Clone)]
pub struct MemorySecretStore {
    secrets: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.secrets
            .lock()
            .unwrap()
            .insert(name.into(), payload.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn latest(&self, name: &str) -> MigrateResult<Vec<u8>> {
        self.secrets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::Secret {
                message: format!("secret '{}' not found", name),
            })
    }
}

/// Credential provider returning fixed identities, for tests and local runs
#[derive(Clone)]
pub struct StaticCredentials {
    principal: String,
}

impl StaticCredentials {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    fn identity(&self, principal: &str, lifetime: Duration) -> Identity {
        Identity {
            principal: principal.to_string(),
            token: AccessToken {
                value: format!("static-token-{}", principal),
                expires_at: Utc::now() + chrono::Duration::from_std(lifetime).unwrap_or_default(),
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn direct(&self, _scopes: &[&str]) -> MigrateResult<Identity> {
        Ok(self.identity(&self.principal, Duration::from_secs(3600)))
    }

    async fn impersonate(
        &self,
        principal: &str,
        _scopes: &[&str],
        lifetime: Duration,
    ) -> MigrateResult<Identity> {
        Ok(self.identity(principal, lifetime))
    }
}

/// In-memory search index recording upserts and deletions
#[derive(Default, Clone)]
pub struct MemorySearchIndex {
    ops: Arc<Mutex<Vec<String>>>,
}

impl MemorySearchIndex {
    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, index: &str, id: &str, _doc: &Document) -> MigrateResult<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("upsert {}/{}", index, id));
        Ok(())
    }

    async fn delete_object(&self, index: &str, id: &str) -> MigrateResult<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("delete {}/{}", index, id));
        Ok(())
    }
}

/// Factory handing out one shared [`MemorySearchIndex`]
#[derive(Default, Clone)]
pub struct MemorySearchIndexFactory {
    index: MemorySearchIndex,
}

impl MemorySearchIndexFactory {
    pub fn index(&self) -> MemorySearchIndex {
        self.index.clone()
    }
}

impl SearchIndexFactory for MemorySearchIndexFactory {
    fn connect(&self, endpoint: &url::Url, _api_key: &str) -> MigrateResult<Arc<dyn SearchIndex>> {
        tracing::debug!(endpoint = %endpoint, "connecting in-memory search index");
        Ok(Arc::new(self.index.clone()))
    }
}
