//! Document store abstraction: collection-scoped lookups and `$set` upserts.
//!
//! Implementations: [`crate::memory::MemoryDocumentStore`] here, and the
//! MongoDB backend in `chainscraper-storage`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A schemaless document.
pub type Document = Map<String, Value>;

/// Field every materialised post/comment is keyed by.
pub const IDENTIFIER_FIELD: &str = "identifier";
/// Soft-delete marker on materialised posts/comments.
pub const DELETED_FIELD: &str = "deleted";
/// Primary key of append-only records.
pub const RECORD_KEY_FIELD: &str = "_id";

/// Lookup by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocFilter {
    pub identifier: String,
    /// Ignore documents carrying `deleted: true`.
    pub exclude_deleted: bool,
}

impl DocFilter {
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), exclude_deleted: false }
    }

    /// Matches only documents that are not marked deleted.
    pub fn live(identifier: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), exclude_deleted: true }
    }

    /// Returns `true` if `doc` satisfies this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        let id_ok = doc.get(IDENTIFIER_FIELD).and_then(Value::as_str) == Some(self.identifier.as_str());
        id_ok && !(self.exclude_deleted && is_deleted(doc))
    }
}

/// Returns `true` if the document carries `deleted: true`.
pub fn is_deleted(doc: &Document) -> bool {
    doc.get(DELETED_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

/// Trait every document-store backend implements.
///
/// Concurrent upserts to the same identifier are last-write-wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Document>>;

    /// Merge `doc` into the document keyed by `identifier` (`$set` semantics).
    /// With `upsert`, a missing document is created; without, the call is a no-op.
    async fn update_one(&self, collection: &str, identifier: &str, doc: &Document, upsert: bool) -> Result<()>;

    /// Insert a new document. Fails with [`crate::ScraperError::DuplicateKey`]
    /// when a document with the same `_id` exists.
    async fn insert_one(&self, collection: &str, doc: &Document) -> Result<()>;
}

/// Content-derived unique key for an append-only record: hex SHA-256 of its
/// canonical JSON (object keys sorted).
pub fn record_key(doc: &Document) -> String {
    let canonical = canonical_json(&Value::Object(doc.clone()));
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Attach the content-derived `_id` to `doc`.
pub fn with_record_key(mut doc: Document) -> Document {
    doc.remove(RECORD_KEY_FIELD);
    let key = record_key(&doc);
    doc.insert(RECORD_KEY_FIELD.into(), Value::String(key));
    doc
}
