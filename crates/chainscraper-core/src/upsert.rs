//! Recursive comment-tree upsert.
//!
//! Root posts go to the application's posts collection and pull all of their
//! replies with them; replies go to the comments collection and pull their
//! root post. Content the ledger no longer has becomes a deletion marker on
//! whatever the applications already store.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::{Result, ScraperError};
use crate::ledger::{Ledger, Post};
use crate::retry::{retry_async, RetryPolicy};
use crate::routing::AppRoutingTable;
use crate::schema::validate_post;
use crate::store::{Document, DocumentStore, DELETED_FIELD, IDENTIFIER_FIELD};

/// Deepest chain of nested upsert calls before a branch is abandoned.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// What a single top-level upsert call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Root-post documents written (one per application).
    pub posts: usize,
    /// Reply documents written (one per application).
    pub comments: usize,
    /// Deletion markers applied.
    pub markers: usize,
    /// Identifiers abandoned because of a data error or a failed write.
    pub failures: usize,
}

pub struct DocumentUpserter {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn DocumentStore>,
    table: Arc<AppRoutingTable>,
    fetch_retry: RetryPolicy,
    store_retry: RetryPolicy,
    max_depth: usize,
}

impl DocumentUpserter {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn DocumentStore>,
        table: Arc<AppRoutingTable>,
        fetch_retry: RetryPolicy,
        store_retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            store,
            table,
            fetch_retry,
            store_retry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Materialise `identifier` (and its thread) for every app in `apps`.
    ///
    /// Never fails: every problem is logged and counted in the returned stats.
    pub async fn upsert(&self, identifier: &str, apps: &BTreeSet<String>, post: Option<Post>) -> UpsertStats {
        let mut stats = UpsertStats::default();
        if let Err(e) = self.upsert_inner(identifier.to_string(), apps, post, true, 0, &mut stats).await {
            stats.failures += 1;
            tracing::error!(identifier, error = %e, "failed to upsert content");
        }
        stats
    }

    fn upsert_inner<'a>(
        &'a self,
        identifier: String,
        apps: &'a BTreeSet<String>,
        post: Option<Post>,
        update_root: bool,
        depth: usize,
        stats: &'a mut UpsertStats,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if depth > self.max_depth {
                return Err(ScraperError::RecursionLimit { identifier });
            }
            let post = match post {
                Some(post) => post,
                None => match self.fetch(&identifier).await {
                    Some(post) => post,
                    None => {
                        self.mark_deleted(&identifier, apps, stats).await;
                        return Ok(());
                    }
                },
            };

            if post.is_root() {
                self.upsert_root(&identifier, post, apps, depth, stats).await
            } else {
                self.upsert_reply(&identifier, post, apps, update_root, depth, stats).await
            }
        }
        .boxed()
    }

    async fn upsert_root(
        &self,
        identifier: &str,
        post: Post,
        apps: &BTreeSet<String>,
        depth: usize,
        stats: &mut UpsertStats,
    ) -> Result<()> {
        let validated = match validate_post(post.into_document()) {
            Ok(doc) => doc,
            Err(e) => {
                stats.failures += 1;
                tracing::error!(identifier, error = %e, "post failed validation");
                return Ok(());
            }
        };
        let body = validated.get("body").and_then(Value::as_str).unwrap_or_default().to_string();

        let mut stored = false;
        for app in apps {
            let Some(collections) = self.table.get(app) else {
                continue;
            };
            let mut doc = validated.clone();
            if !collections.content_rule.accepts(&body) {
                doc.insert(DELETED_FIELD.into(), Value::Bool(true));
                tracing::info!(identifier, app = %app, "post fails content rule, marked deleted");
            }
            if self.write(&collections.posts, identifier, &doc, true).await {
                stats.posts += 1;
                stored = true;
            } else {
                stats.failures += 1;
            }
        }
        if !stored {
            return Ok(());
        }

        let replies = {
            let ledger = &self.ledger;
            retry_async(&self.store_retry, "get_replies", move || async move { ledger.get_replies(identifier).await }).await
        };
        match replies {
            Ok(replies) => {
                for reply in replies {
                    let reply_id = reply.identifier().to_string();
                    if reply_id.is_empty() || reply.is_root() {
                        continue;
                    }
                    if let Err(e) = self.upsert_inner(reply_id.clone(), apps, Some(reply), false, depth + 1, stats).await {
                        stats.failures += 1;
                        tracing::error!(identifier = %reply_id, error = %e, "failed to upsert reply");
                    }
                }
            }
            Err(e) => tracing::error!(identifier, error = %e, "failed to fetch replies"),
        }
        Ok(())
    }

    async fn upsert_reply(
        &self,
        identifier: &str,
        post: Post,
        apps: &BTreeSet<String>,
        update_root: bool,
        depth: usize,
        stats: &mut UpsertStats,
    ) -> Result<()> {
        let root = post.root_identifier();
        let doc = post.into_document();
        for app in apps {
            let Some(collections) = self.table.get(app) else {
                continue;
            };
            if self.write(&collections.comments, identifier, &doc, true).await {
                stats.comments += 1;
            } else {
                stats.failures += 1;
            }
        }
        if !update_root {
            return Ok(());
        }
        match root {
            Some(root) if root != identifier => self.upsert_inner(root, apps, None, true, depth + 1, stats).await,
            Some(_) => Err(ScraperError::Validation {
                identifier: identifier.to_string(),
                reason: "reply names itself as its root".into(),
            }),
            None => {
                tracing::warn!(identifier, "reply carries no root reference");
                Ok(())
            }
        }
    }

    /// Fetch from the ledger, retrying transient failures. `None` when the
    /// content is absent or every attempt failed.
    async fn fetch(&self, identifier: &str) -> Option<Post> {
        let ledger = &self.ledger;
        match retry_async(&self.fetch_retry, "get_content", move || async move { ledger.get_content(identifier).await }).await {
            Ok(Some(post)) => Some(post),
            Ok(None) => {
                tracing::info!(identifier, "content absent from the ledger");
                None
            }
            Err(e) => {
                tracing::warn!(identifier, error = %e, "giving up fetching content");
                None
            }
        }
    }

    /// Flag `identifier` deleted in every collection of every app, without
    /// creating documents that do not exist.
    async fn mark_deleted(&self, identifier: &str, apps: &BTreeSet<String>, stats: &mut UpsertStats) {
        let mut marker = Document::new();
        marker.insert(IDENTIFIER_FIELD.into(), Value::String(identifier.to_string()));
        marker.insert(DELETED_FIELD.into(), Value::Bool(true));
        for app in apps {
            let Some(collections) = self.table.get(app) else {
                continue;
            };
            for collection in [&collections.posts, &collections.comments] {
                if self.write(collection, identifier, &marker, false).await {
                    stats.markers += 1;
                }
            }
        }
        tracing::info!(identifier, "content marked as deleted");
    }

    async fn write(&self, collection: &str, identifier: &str, doc: &Document, upsert: bool) -> bool {
        let store = &self.store;
        let result = retry_async(&self.store_retry, "update_one", move || async move {
            store.update_one(collection, identifier, doc, upsert).await
        })
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(collection, identifier, error = %e, "failed to write document");
                false
            }
        }
    }
}
