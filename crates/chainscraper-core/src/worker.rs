//! Worker: pops blocks from a direction's work list and dispatches each
//! operation to the upserter, the record collections or the notifier.
//!
//! A processed block is reported by pushing its number onto the direction's
//! result list, where the consolidator picks it up.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ScraperConfig;
use crate::error::{Result, ScraperError};
use crate::ledger::Ledger;
use crate::notify::{EventKind, NotificationEvent, Notifier};
use crate::operation::{Amount, Operation, OperationBody};
use crate::queue::WorkQueue;
use crate::retry::{retry_async, RetryPolicy};
use crate::routing::RoutingFilter;
use crate::store::{with_record_key, Document, DocumentStore};
use crate::types::{Block, Direction, QueueNames};
use crate::upsert::DocumentUpserter;

/// Operation types that only matter going forward.
const FORWARD_ONLY_POST_TYPES: [&str; 2] = ["author_reward", "vote"];

/// Everything a worker needs, shared by all workers of both directions.
pub struct WorkerContext {
    pub config: Arc<ScraperConfig>,
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn DocumentStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub routing: RoutingFilter,
    pub upserter: Arc<DocumentUpserter>,
    pub notifier: Arc<dyn Notifier>,
    pub names: QueueNames,
    pub store_retry: RetryPolicy,
}

pub struct Worker {
    id: usize,
    direction: Direction,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(id: usize, direction: Direction, ctx: Arc<WorkerContext>) -> Self {
        Self { id, direction, ctx }
    }

    /// Loop forever: process a block when one is available, otherwise sleep
    /// for the polling interval.
    pub async fn run(&self) {
        tracing::debug!(worker = self.id, direction = %self.direction, "worker started");
        let idle = self.ctx.config.scraper.polling_interval();
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(idle).await,
                Err(e) => {
                    tracing::warn!(worker = self.id, direction = %self.direction, error = %e, "worker iteration failed");
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// Pop and process one block. Returns `false` when the list was empty.
    pub async fn poll_once(&self) -> Result<bool> {
        let list = self.ctx.names.blocks(self.direction);
        let Some(raw) = self.ctx.queue.pop(&list).await? else {
            return Ok(false);
        };
        match Block::decode(&raw) {
            Ok(block) => self.process_block(&block).await?,
            Err(e) => tracing::error!(worker = self.id, list = %list, error = %e, "dropping undecodable block"),
        }
        Ok(true)
    }

    /// Dispatch every operation of `block`, then report the block number.
    ///
    /// A failing operation is logged and skipped; only a failure to report
    /// the block is returned.
    pub async fn process_block(&self, block: &Block) -> Result<()> {
        for op in &block.operations {
            if let Err(e) = self.dispatch(op).await {
                tracing::error!(
                    worker = self.id,
                    direction = %self.direction,
                    block = block.block_num,
                    op_type = op.op_type(),
                    error = %e,
                    "failed to process operation"
                );
            }
        }

        let list = self.ctx.names.results(self.direction);
        let value = block.block_num.to_string().into_bytes();
        let (queue, list, value) = (&self.ctx.queue, &list, &value);
        retry_async(&self.ctx.store_retry, "push_result", move || async move {
            queue.push(list, value.clone()).await
        })
        .await?;
        tracing::debug!(worker = self.id, direction = %self.direction, block = block.block_num, "block processed");
        Ok(())
    }

    async fn dispatch(&self, op: &Operation) -> Result<()> {
        let config = &self.ctx.config;
        let op_type = op.op_type();

        if config.operations.post.contains(op_type)
            && !(self.direction == Direction::Backward && FORWARD_ONLY_POST_TYPES.contains(&op_type))
        {
            self.update_content(op).await;
        }
        if config.operations.delegate.contains(op_type) || config.operations.account.contains(op_type) {
            self.insert_operation(op).await?;
        }
        if config.operations.transfer.contains(op_type) {
            if let OperationBody::Transfer { to, .. } = &op.body {
                if config.curator_payouts.accounts_for_transfer.contains(to) {
                    self.insert_curator(op).await?;
                }
            }
        }
        if self.direction.is_forward() && config.notification.send {
            if let Some(kind) = config.notification.events.get(op_type) {
                self.notify(*kind, op).await;
            }
        }
        Ok(())
    }

    async fn update_content(&self, op: &Operation) {
        let Some(identifier) = op.identifier() else {
            return;
        };
        let parent = op.parent_identifier();
        let apps = self
            .ctx
            .routing
            .apps_for(op, Some(identifier.as_str()), parent.as_deref(), self.direction)
            .await;
        if apps.is_empty() {
            return;
        }
        tracing::info!(worker = self.id, identifier = %identifier, "update post");
        let stats = self.ctx.upserter.upsert(&identifier, &apps, None).await;
        tracing::debug!(identifier = %identifier, ?stats, "upsert finished");
    }

    /// Record a delegate or account-update operation.
    async fn insert_operation(&self, op: &Operation) -> Result<()> {
        let doc = match serde_json::to_value(op)? {
            Value::Object(doc) => doc,
            other => return Err(ScraperError::Codec(format!("operation serialised to a non-object: {other}"))),
        };
        self.insert_record(&self.ctx.config.collections.operations, doc).await
    }

    /// Record a payout transfer to a watched account, subject to the
    /// configured minimum and currencies.
    async fn insert_curator(&self, op: &Operation) -> Result<()> {
        let OperationBody::Transfer { from, amount, .. } = &op.body else {
            return Ok(());
        };
        let payouts = &self.ctx.config.curator_payouts;
        let amount = Amount::parse(amount)?;
        if amount.amount < payouts.minimal_sum || !payouts.currencies.contains(&amount.asset) {
            return Ok(());
        }
        let mut doc = Document::new();
        doc.insert("username".into(), Value::String(from.clone()));
        doc.insert("trx_timestamp".into(), Value::String(op.timestamp.clone()));
        doc.insert("sum".into(), amount.amount.into());
        doc.insert("currency".into(), Value::String(amount.asset));
        self.insert_record(&self.ctx.config.collections.curators, doc).await
    }

    /// Insert an append-only record keyed by its content; duplicates are a no-op.
    async fn insert_record(&self, collection: &str, doc: Document) -> Result<()> {
        let doc = with_record_key(doc);
        let store = &self.ctx.store;
        let doc = &doc;
        let result = retry_async(&self.ctx.store_retry, "insert_one", move || async move {
            store.insert_one(collection, doc).await
        })
        .await;
        match result {
            Err(e) if e.is_duplicate_key() => Ok(()),
            other => other,
        }
    }

    async fn notify(&self, kind: EventKind, op: &Operation) {
        let event = match NotificationEvent::resolve(kind, op, self.ctx.ledger.as_ref()).await {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(op_type = op.op_type(), error = %e, "failed to build notification");
                return;
            }
        };
        let payload = event.payload();
        match self.ctx.notifier.send(&payload).await {
            Ok(()) => tracing::debug!(event_type = %payload.event_type, "notification sent"),
            Err(e) => tracing::warn!(event_type = %payload.event_type, error = %e, "failed to send notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ContentRule};
    use crate::memory::{MemoryDocumentStore, MemoryLedger, MemoryNotifier, MemoryQueue};
    use crate::routing::AppRoutingTable;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        store: Arc<MemoryDocumentStore>,
        queue: Arc<MemoryQueue>,
        notifier: Arc<MemoryNotifier>,
        ctx: Arc<WorkerContext>,
    }

    fn harness(configure: impl FnOnce(&mut ScraperConfig)) -> Harness {
        let mut config = ScraperConfig::default();
        config.apps = BTreeMap::from([(
            "steepshot".to_string(),
            AppConfig { posts: "Posts".into(), comments: "Comments".into(), content_rule: ContentRule::None },
        )]);
        config.curator_payouts.accounts_for_transfer.insert("watched".into());
        config.curator_payouts.currencies.insert("TOKEN".into());
        configure(&mut config);
        let config = Arc::new(config);

        let ledger = Arc::new(MemoryLedger::new(100));
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let table = Arc::new(AppRoutingTable::from_config(&config));
        let routing = RoutingFilter::new(store.clone(), table.clone(), RetryPolicy::immediate(1));
        let upserter = Arc::new(DocumentUpserter::new(
            ledger.clone(),
            store.clone(),
            table,
            RetryPolicy::immediate(2),
            RetryPolicy::immediate(1),
        ));
        let ctx = Arc::new(WorkerContext {
            config,
            ledger: ledger.clone(),
            store: store.clone(),
            queue: queue.clone(),
            routing,
            upserter,
            notifier: notifier.clone(),
            names: QueueNames::default(),
            store_retry: RetryPolicy::immediate(1),
        });
        Harness { ledger, store, queue, notifier, ctx }
    }

    fn op(v: serde_json::Value) -> Operation {
        Operation::from_json(v).unwrap()
    }

    fn transfer(block: u64, to: &str, amount: &str) -> Operation {
        op(json!({"type": "transfer", "block_num": block, "from": "x", "to": to, "amount": amount, "memo": "m"}))
    }

    fn tracked_vote(h: &Harness) -> Operation {
        h.ledger.insert_post(crate::ledger::Post::from_document(
            json!({"author": "a", "permlink": "p1", "parent_author": "", "parent_permlink": "photo", "title": "t", "body": "b"})
                .as_object()
                .cloned()
                .unwrap(),
        ));
        op(json!({"type": "vote", "block_num": 7, "voter": "v", "author": "a", "permlink": "p1", "weight": 100}))
    }

    async fn track_post(h: &Harness) {
        h.store
            .update_one("Posts", "@a/p1", &json!({"title": "old"}).as_object().cloned().unwrap(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_queue_is_not_an_error() {
        let h = harness(|_| {});
        let worker = Worker::new(0, Direction::Forward, h.ctx.clone());
        assert!(!worker.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn processed_block_is_reported() {
        let h = harness(|_| {});
        let mut block = Block::new(11);
        block.operations.push(transfer(11, "watched", "5.000 TOKEN"));
        h.queue.push(&h.ctx.names.blocks(Direction::Forward), block.encode().unwrap()).await.unwrap();

        let worker = Worker::new(0, Direction::Forward, h.ctx.clone());
        assert!(worker.poll_once().await.unwrap());

        assert_eq!(h.queue.strings(&h.ctx.names.results(Direction::Forward)), vec!["11"]);
        let curators = h.store.documents("Curators");
        assert_eq!(curators.len(), 1);
        assert_eq!(curators[0]["username"], "x");
        assert_eq!(curators[0]["sum"], 5.0);
        assert_eq!(curators[0]["currency"], "TOKEN");
    }

    #[tokio::test]
    async fn curator_payouts_respect_thresholds() {
        let h = harness(|_| {});
        let worker = Worker::new(0, Direction::Forward, h.ctx.clone());
        let mut block = Block::new(12);
        block.operations.push(transfer(12, "watched", "0.500 TOKEN"));
        block.operations.push(transfer(12, "watched", "9.000 OTHER"));
        block.operations.push(transfer(12, "someone", "9.000 TOKEN"));
        worker.process_block(&block).await.unwrap();
        assert_eq!(h.store.count("Curators"), 0);
    }

    #[tokio::test]
    async fn redelivered_records_are_inserted_once() {
        let h = harness(|_| {});
        let worker = Worker::new(0, Direction::Backward, h.ctx.clone());
        let mut block = Block::new(13);
        block.operations.push(op(json!({
            "type": "delegate_vesting_shares", "block_num": 13, "trx_id": "abc",
            "delegator": "x", "delegatee": "y", "vesting_shares": "10.000000 VESTS"
        })));
        block.operations.push(transfer(13, "watched", "2.000 TOKEN"));

        worker.process_block(&block).await.unwrap();
        worker.process_block(&block).await.unwrap();

        assert_eq!(h.store.count("Operations"), 1);
        assert_eq!(h.store.count("Curators"), 1);
        assert_eq!(h.queue.strings(&h.ctx.names.results(Direction::Backward)), vec!["13", "13"]);
    }

    #[tokio::test]
    async fn backward_skips_votes_and_rewards() {
        let h = harness(|_| {});
        let vote = tracked_vote(&h);
        track_post(&h).await;
        let mut block = Block::new(7);
        block.operations.push(vote);

        Worker::new(0, Direction::Backward, h.ctx.clone()).process_block(&block).await.unwrap();
        assert_eq!(h.store.get("Posts", "@a/p1").unwrap()["title"], "old");

        Worker::new(1, Direction::Forward, h.ctx.clone()).process_block(&block).await.unwrap();
        assert_eq!(h.store.get("Posts", "@a/p1").unwrap()["title"], "t");
    }

    #[tokio::test]
    async fn notifications_are_forward_only() {
        let h = harness(|c| {
            c.notification.send = true;
            c.notification.url = Some("http://hooks".into());
            c.notification.events.insert("transfer".into(), EventKind::Transfer);
        });
        let mut block = Block::new(20);
        block.operations.push(transfer(20, "y", "1.000 STEEM"));

        Worker::new(0, Direction::Backward, h.ctx.clone()).process_block(&block).await.unwrap();
        assert!(h.notifier.sent().is_empty());

        Worker::new(0, Direction::Forward, h.ctx.clone()).process_block(&block).await.unwrap();
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type, "transfer");
        assert_eq!(sent[0].initiator, "x");
    }

    #[tokio::test]
    async fn failing_notifier_does_not_abort_block() {
        let h = harness(|c| {
            c.notification.send = true;
            c.notification.url = Some("http://hooks".into());
            c.notification.events.insert("transfer".into(), EventKind::Transfer);
        });
        h.notifier.fail_all(true);
        let mut block = Block::new(21);
        block.operations.push(transfer(21, "watched", "3.000 TOKEN"));

        Worker::new(0, Direction::Forward, h.ctx.clone()).process_block(&block).await.unwrap();
        assert_eq!(h.store.count("Curators"), 1);
        assert_eq!(h.queue.strings(&h.ctx.names.results(Direction::Forward)), vec!["21"]);
    }

    #[tokio::test]
    async fn malformed_amount_does_not_abort_block() {
        let h = harness(|_| {});
        let mut block = Block::new(22);
        block.operations.push(transfer(22, "watched", "lots"));
        block.operations.push(transfer(22, "watched", "4.000 TOKEN"));

        Worker::new(0, Direction::Forward, h.ctx.clone()).process_block(&block).await.unwrap();
        assert_eq!(h.store.count("Curators"), 1);
    }
}
