//! Application routing: which downstream applications care about a piece of
//! content.
//!
//! The decision starts from the applications named in the operation's
//! metadata and adds every application whose collections already track the
//! content or its parent. Forward and backward scans differ: a live post that
//! is already materialised is only refreshed going forward.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::{AppConfig, ScraperConfig};
use crate::operation::Operation;
use crate::retry::{retry_async, RetryPolicy};
use crate::store::{DocFilter, DocumentStore};
use crate::types::Direction;

/// Static mapping from application name to the collections it owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppRoutingTable {
    apps: BTreeMap<String, AppConfig>,
}

impl AppRoutingTable {
    pub fn new(apps: BTreeMap<String, AppConfig>) -> Self {
        Self { apps }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(config.apps.clone())
    }

    pub fn get(&self, app: &str) -> Option<&AppConfig> {
        self.apps.get(app)
    }

    pub fn contains(&self, app: &str) -> bool {
        self.apps.contains_key(app)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AppConfig)> {
        self.apps.iter()
    }
}

/// Decides the set of applications interested in an operation.
#[derive(Clone)]
pub struct RoutingFilter {
    store: Arc<dyn DocumentStore>,
    table: Arc<AppRoutingTable>,
    retry: RetryPolicy,
}

impl RoutingFilter {
    pub fn new(store: Arc<dyn DocumentStore>, table: Arc<AppRoutingTable>, retry: RetryPolicy) -> Self {
        Self { store, table, retry }
    }

    /// Applications that must see the content touched by `op`.
    ///
    /// Metadata applications unknown to the routing table are dropped. A
    /// lookup that keeps failing counts as "not found".
    pub async fn apps_for(
        &self,
        op: &Operation,
        identifier: Option<&str>,
        parent_identifier: Option<&str>,
        direction: Direction,
    ) -> BTreeSet<String> {
        let mut apps: BTreeSet<String> = op.metadata_apps().into_iter().filter(|app| self.table.contains(app)).collect();

        for (app, collections) in self.table.iter() {
            if let Some(identifier) = identifier {
                if self.exists(&collections.posts, DocFilter::live(identifier)).await {
                    if direction.is_forward() {
                        apps.insert(app.clone());
                    } else {
                        apps.remove(app);
                    }
                    continue;
                }
            }
            let Some(parent) = parent_identifier else {
                continue;
            };
            if self.exists(&collections.posts, DocFilter::live(parent)).await {
                if direction.is_forward() {
                    apps.insert(app.clone());
                }
                continue;
            }
            if self.exists(&collections.comments, DocFilter::identifier(parent)).await {
                apps.insert(app.clone());
            }
        }
        apps
    }

    async fn exists(&self, collection: &str, filter: DocFilter) -> bool {
        let store = &self.store;
        let filter = &filter;
        let found = retry_async(&self.retry, "find_one", move || async move { store.find_one(collection, filter).await }).await;
        match found {
            Ok(doc) => doc.is_some(),
            Err(e) => {
                tracing::warn!(collection, identifier = %filter.identifier, error = %e, "lookup failed, treating as not found");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentRule;
    use crate::memory::MemoryDocumentStore;
    use crate::operation::OperationBody;
    use crate::store::Document;
    use serde_json::json;

    fn table() -> Arc<AppRoutingTable> {
        Arc::new(AppRoutingTable::new(BTreeMap::from([(
            "steepshot".to_string(),
            AppConfig { posts: "Posts".into(), comments: "Comments".into(), content_rule: ContentRule::None },
        )])))
    }

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn vote() -> Operation {
        Operation::new(
            10,
            OperationBody::Vote { voter: "b".into(), author: "a".into(), permlink: "p1".into(), weight: 100 },
        )
    }

    fn reply(json_metadata: &str) -> Operation {
        Operation::new(
            10,
            OperationBody::Comment {
                parent_author: "a".into(),
                parent_permlink: "p1".into(),
                author: "c".into(),
                permlink: "r1".into(),
                title: String::new(),
                body: "hi".into(),
                json_metadata: json_metadata.into(),
            },
        )
    }

    async fn filter_with_post(deleted: bool) -> (RoutingFilter, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        store.update_one("Posts", "@a/p1", &doc(json!({"deleted": deleted})), true).await.unwrap();
        (RoutingFilter::new(store.clone(), table(), RetryPolicy::immediate(2)), store)
    }

    #[tokio::test]
    async fn existing_post_is_routed_forward_only() {
        let (filter, _) = filter_with_post(false).await;
        let op = vote();
        let id = op.identifier();

        let forward = filter.apps_for(&op, id.as_deref(), None, Direction::Forward).await;
        assert!(forward.contains("steepshot"));

        let backward = filter.apps_for(&op, id.as_deref(), None, Direction::Backward).await;
        assert!(backward.is_empty());
    }

    #[tokio::test]
    async fn backward_suppresses_metadata_app_for_tracked_post() {
        let (filter, _) = filter_with_post(false).await;
        let op = Operation::new(
            10,
            OperationBody::Comment {
                parent_author: String::new(),
                parent_permlink: "photo".into(),
                author: "a".into(),
                permlink: "p1".into(),
                title: "t".into(),
                body: "b".into(),
                json_metadata: r#"{"app":"steepshot/0.3"}"#.into(),
            },
        );
        let backward = filter.apps_for(&op, op.identifier().as_deref(), None, Direction::Backward).await;
        assert!(backward.is_empty());
    }

    #[tokio::test]
    async fn deleted_post_is_not_tracked() {
        let (filter, _) = filter_with_post(true).await;
        let op = vote();
        let apps = filter.apps_for(&op, op.identifier().as_deref(), None, Direction::Forward).await;
        assert!(apps.is_empty());
    }

    #[tokio::test]
    async fn reply_to_tracked_post_follows_direction() {
        let (filter, _) = filter_with_post(false).await;
        let op = reply("");
        let (id, parent) = (op.identifier(), op.parent_identifier());

        let forward = filter.apps_for(&op, id.as_deref(), parent.as_deref(), Direction::Forward).await;
        assert!(forward.contains("steepshot"));
        let backward = filter.apps_for(&op, id.as_deref(), parent.as_deref(), Direction::Backward).await;
        assert!(backward.is_empty());
    }

    #[tokio::test]
    async fn reply_to_tracked_comment_is_routed_both_ways() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.update_one("Comments", "@a/p1", &doc(json!({"body": "x"})), true).await.unwrap();
        let filter = RoutingFilter::new(store, table(), RetryPolicy::immediate(2));
        let op = reply("");
        let (id, parent) = (op.identifier(), op.parent_identifier());
        for direction in Direction::ALL {
            let apps = filter.apps_for(&op, id.as_deref(), parent.as_deref(), direction).await;
            assert!(apps.contains("steepshot"), "{direction}");
        }
    }

    #[tokio::test]
    async fn metadata_apps_are_limited_to_known_apps() {
        let store = Arc::new(MemoryDocumentStore::new());
        let filter = RoutingFilter::new(store, table(), RetryPolicy::immediate(2));
        let ours = reply(r#"{"app":"steepshot/0.3"}"#);
        let theirs = reply(r#"{"app":"busy/2.0"}"#);
        assert_eq!(
            filter.apps_for(&ours, None, None, Direction::Backward).await,
            BTreeSet::from(["steepshot".to_string()])
        );
        assert!(filter.apps_for(&theirs, None, None, Direction::Forward).await.is_empty());
    }

    #[tokio::test]
    async fn transient_lookup_failures_are_retried() {
        let (filter, store) = filter_with_post(false).await;
        store.fail_reads(2);
        let op = vote();
        let apps = filter.apps_for(&op, op.identifier().as_deref(), None, Direction::Forward).await;
        assert!(apps.contains("steepshot"));
    }

    #[tokio::test]
    async fn exhausted_lookups_fail_open() {
        let (filter, store) = filter_with_post(false).await;
        store.fail_reads(10);
        let op = vote();
        let apps = filter.apps_for(&op, op.identifier().as_deref(), None, Direction::Forward).await;
        assert!(apps.is_empty());
    }
}
