//! Producer-side operation filter.

use std::sync::Arc;

use crate::config::ScraperConfig;
use crate::operation::Operation;
use crate::routing::RoutingFilter;
use crate::types::Direction;

/// Decides which operations are worth a worker's time.
#[derive(Clone)]
pub struct OperationFilter {
    config: Arc<ScraperConfig>,
    routing: RoutingFilter,
}

impl OperationFilter {
    pub fn new(config: Arc<ScraperConfig>, routing: RoutingFilter) -> Self {
        Self { config, routing }
    }

    /// Returns `true` if `op` should be queued.
    ///
    /// Transfer and delegate types always pass. Account updates pass when
    /// they name a watched account. Post-related types pass when at least one
    /// application is interested in the content.
    pub async fn accepts(&self, op: &Operation, direction: Direction) -> bool {
        let sets = &self.config.operations;
        let op_type = op.op_type();
        if sets.transfer.contains(op_type) || sets.delegate.contains(op_type) {
            return true;
        }
        if sets.account.contains(op_type) {
            return op
                .authority_accounts()
                .iter()
                .any(|account| self.config.watch_accounts.contains(*account));
        }
        if sets.post.contains(op_type) {
            let identifier = op.identifier();
            let parent = op.parent_identifier();
            let apps = self
                .routing
                .apps_for(op, identifier.as_deref(), parent.as_deref(), direction)
                .await;
            return !apps.is_empty();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ContentRule};
    use crate::memory::MemoryDocumentStore;
    use crate::operation::OperationBody;
    use crate::retry::RetryPolicy;
    use crate::routing::AppRoutingTable;
    use crate::store::DocumentStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn filter(store: Arc<MemoryDocumentStore>) -> OperationFilter {
        let mut config = ScraperConfig::default();
        config.chain.nodes = vec!["http://node".into()];
        config.watch_accounts.insert("steepshot".into());
        config.apps = BTreeMap::from([(
            "steepshot".to_string(),
            AppConfig { posts: "Posts".into(), comments: "Comments".into(), content_rule: ContentRule::None },
        )]);
        let table = Arc::new(AppRoutingTable::from_config(&config));
        OperationFilter::new(Arc::new(config), RoutingFilter::new(store, table, RetryPolicy::immediate(1)))
    }

    fn op(v: serde_json::Value) -> Operation {
        Operation::from_json(v).unwrap()
    }

    #[tokio::test]
    async fn transfers_and_delegations_always_pass() {
        let f = filter(Arc::new(MemoryDocumentStore::new()));
        let transfer = op(json!({"type": "transfer", "block_num": 1, "from": "x", "to": "y", "amount": "1.000 STEEM"}));
        let delegate = op(json!({
            "type": "delegate_vesting_shares", "block_num": 1,
            "delegator": "x", "delegatee": "y", "vesting_shares": "10.000000 VESTS"
        }));
        assert!(f.accepts(&transfer, Direction::Backward).await);
        assert!(f.accepts(&delegate, Direction::Forward).await);
    }

    #[tokio::test]
    async fn account_updates_need_a_watched_account() {
        let f = filter(Arc::new(MemoryDocumentStore::new()));
        let granted = op(json!({
            "type": "account_update", "block_num": 2, "account": "alice",
            "posting": {"weight_threshold": 1, "account_auths": [["steepshot", 1]], "key_auths": []}
        }));
        let unrelated = op(json!({"type": "account_update", "block_num": 2, "account": "bob"}));
        assert!(f.accepts(&granted, Direction::Forward).await);
        assert!(!f.accepts(&unrelated, Direction::Forward).await);
    }

    #[tokio::test]
    async fn post_operations_need_an_interested_app() {
        let store = Arc::new(MemoryDocumentStore::new());
        let f = filter(store.clone());
        let vote = Operation::new(
            3,
            OperationBody::Vote { voter: "b".into(), author: "a".into(), permlink: "p1".into(), weight: 1 },
        );
        assert!(!f.accepts(&vote, Direction::Forward).await);

        store
            .update_one("Posts", "@a/p1", &json!({"title": "t"}).as_object().cloned().unwrap(), true)
            .await
            .unwrap();
        assert!(f.accepts(&vote, Direction::Forward).await);
        assert!(!f.accepts(&vote, Direction::Backward).await);
    }

    #[tokio::test]
    async fn unconfigured_types_are_dropped() {
        let f = filter(Arc::new(MemoryDocumentStore::new()));
        let witness = op(json!({"type": "witness_update", "block_num": 4}));
        let reward = op(json!({
            "type": "curation_reward", "block_num": 4,
            "curator": "c", "comment_author": "a", "comment_permlink": "p"
        }));
        assert!(!f.accepts(&witness, Direction::Forward).await);
        assert!(!f.accepts(&reward, Direction::Forward).await);
    }
}
