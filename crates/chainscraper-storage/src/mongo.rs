//! MongoDB document store.
//!
//! Every collection is addressed by name at call time; posts, comments,
//! records and the checkpoint document all live in the one database.
//!
//! # Usage
//! ```rust,no_run
//! use chainscraper_storage::mongo::MongoDocumentStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MongoDocumentStore::connect("mongodb://localhost:27017", "SteemData").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{Error as MongoError, ErrorKind, WriteError, WriteFailure};
use mongodb::options::{ClientOptions, UpdateOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::{debug, info};

use chainscraper_core::error::{Result, ScraperError};
use chainscraper_core::store::{DocFilter, Document, DocumentStore, DELETED_FIELD, IDENTIFIER_FIELD};

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed [`DocumentStore`].
#[derive(Clone)]
pub struct MongoDocumentStore {
    db: Database,
}

impl MongoDocumentStore {
    /// Connect to `uri` and use database `database`.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        info!(database, "connecting to mongodb");
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| ScraperError::Config(format!("invalid mongodb uri: {e}")))?;
        let client = Client::with_options(options).map_err(storage_error)?;
        Ok(Self { db: client.database(database) })
    }

    /// Check the server answers.
    pub async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await.map_err(storage_error)?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.db.collection::<bson::Document>(name)
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Document>> {
        let found = self
            .collection(collection)
            .find_one(filter_document(filter), None)
            .await
            .map_err(storage_error)?;
        found.map(from_bson).transpose()
    }

    async fn update_one(&self, collection: &str, identifier: &str, doc: &Document, upsert: bool) -> Result<()> {
        let mut fields = to_bson(doc)?;
        fields.insert(IDENTIFIER_FIELD, identifier);
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection(collection)
            .update_one(doc! { IDENTIFIER_FIELD: identifier }, doc! { "$set": fields }, options)
            .await
            .map_err(storage_error)?;
        debug!(
            collection,
            identifier,
            matched = result.matched_count,
            upserted = result.upserted_id.is_some(),
            "update_one"
        );
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: &Document) -> Result<()> {
        let record = to_bson(doc)?;
        match self.collection(collection).insert_one(record, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(ScraperError::DuplicateKey { collection: collection.to_string() }),
            Err(e) => Err(storage_error(e)),
        }
    }
}

fn storage_error(e: MongoError) -> ScraperError {
    ScraperError::Storage(e.to_string())
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(WriteError { code: DUPLICATE_KEY_CODE, .. }))
    )
}

/// Query matching [`DocFilter`].
pub fn filter_document(filter: &DocFilter) -> bson::Document {
    let mut query = doc! { IDENTIFIER_FIELD: filter.identifier.as_str() };
    if filter.exclude_deleted {
        query.insert(DELETED_FIELD, doc! { "$ne": true });
    }
    query
}

/// Convert a JSON document to BSON.
pub fn to_bson(doc: &Document) -> Result<bson::Document> {
    bson::to_document(doc).map_err(|e| ScraperError::Codec(format!("document is not representable as bson: {e}")))
}

/// Convert a BSON document to JSON using relaxed extended JSON, so plain
/// numbers and strings come back unchanged.
pub fn from_bson(doc: bson::Document) -> Result<Document> {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(ScraperError::Codec(format!("expected a document, got {other}"))),
    }
}
