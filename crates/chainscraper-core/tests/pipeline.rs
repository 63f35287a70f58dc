//! End-to-end behaviour of the scraping pipeline over in-memory backends.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use serde_json::json;

use chainscraper_core::memory::{MemoryDocumentStore, MemoryLedger, MemoryNotifier, MemoryQueue};
use chainscraper_core::producer::StallTracker;
use chainscraper_core::retry::RetryPolicy;
use chainscraper_core::store::is_deleted;
use chainscraper_core::{
    AppRoutingTable, Checkpoint, CheckpointStore, Direction, DocumentCheckpointStore, DocumentUpserter, Operation,
    Pipeline, Post, QueueNames, RoutingFilter, ScraperConfig, WorkQueue,
};

const CONFIG: &str = r#"
chain:
  nodes: ["http://127.0.0.1:8090"]
curator_payouts:
  accounts_for_transfer: [watched]
  minimal_sum: 1.0
  currencies: [TOKEN]
apps:
  steepshot:
    posts: Posts
    comments: Comments
scraper:
  workers_per_direction: 1
  polling_interval_ms: 5
  consolidator_idle_ms: 5
  store_retries: 1
  fetch_attempts: 2
"#;

struct Setup {
    config: Arc<ScraperConfig>,
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryDocumentStore>,
    queue: Arc<MemoryQueue>,
}

impl Setup {
    fn new(head: u64, configure: impl FnOnce(&mut ScraperConfig)) -> Self {
        let mut config = ScraperConfig::from_yaml_str(CONFIG).unwrap();
        configure(&mut config);
        Self {
            config: Arc::new(config),
            ledger: Arc::new(MemoryLedger::new(head)),
            store: Arc::new(MemoryDocumentStore::new()),
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.config.clone(),
            self.ledger.clone(),
            self.store.clone(),
            self.queue.clone(),
            Arc::new(MemoryNotifier::new()),
        )
    }

    fn upserter(&self) -> DocumentUpserter {
        DocumentUpserter::new(
            self.ledger.clone(),
            self.store.clone(),
            Arc::new(AppRoutingTable::from_config(&self.config)),
            RetryPolicy::immediate(2),
            RetryPolicy::immediate(1),
        )
    }
}

fn op(v: serde_json::Value) -> Operation {
    Operation::from_json(v).unwrap()
}

fn post(v: serde_json::Value) -> Post {
    Post::from_document(v.as_object().cloned().unwrap())
}

fn root(author: &str, permlink: &str) -> Post {
    post(json!({
        "author": author, "permlink": permlink, "parent_author": "", "parent_permlink": "photo",
        "title": "a photo", "body": "![x](https://img.example.org/x.jpg)",
        "json_metadata": "{\"app\": \"steepshot/0.1\"}"
    }))
}

fn reply(author: &str, permlink: &str, parent: &str, root: (&str, &str)) -> Post {
    let (parent_author, parent_permlink) = parent.trim_start_matches('@').split_once('/').unwrap();
    post(json!({
        "author": author, "permlink": permlink,
        "parent_author": parent_author, "parent_permlink": parent_permlink,
        "root_author": root.0, "root_permlink": root.1, "body": "nice"
    }))
}

fn steepshot() -> BTreeSet<String> {
    BTreeSet::from(["steepshot".to_string()])
}

/// Comment, vote and curator transfer across blocks 10 and 11. The comment
/// carries a `steepshot` app tag in its metadata; without one no application
/// claims the post (see `untagged_comment_is_not_materialised`).
#[tokio::test]
async fn app_tagged_comment_vote_and_curator_transfer() {
    let s = Setup::new(11, |c| c.scraper.backward = false);
    s.ledger.insert_post(root("a", "p1"));
    let ops = vec![
        op(json!({
            "type": "comment", "block_num": 10, "author": "a", "permlink": "p1",
            "parent_author": "", "parent_permlink": "photo", "title": "a photo",
            "json_metadata": "{\"app\": \"steepshot/0.1\"}"
        })),
        op(json!({"type": "vote", "block_num": 10, "voter": "b", "author": "a", "permlink": "p1", "weight": 5000})),
        op(json!({"type": "transfer", "block_num": 11, "from": "x", "to": "watched", "amount": "5.000 TOKEN", "memo": ""})),
    ];

    let pipeline = s.pipeline();
    let producer = pipeline.producers().next().unwrap();
    assert_eq!(producer.direction(), Direction::Forward);
    let pushed = producer.scan(stream::iter(ops.into_iter().map(Ok))).await.unwrap();
    assert_eq!(pushed, 2);

    let worker = pipeline.workers().next().unwrap();
    while worker.poll_once().await.unwrap() {}

    assert_eq!(s.store.count("Posts"), 1);
    assert!(s.store.get("Posts", "@a/p1").is_some());
    assert_eq!(s.store.count("Comments"), 0);

    let curators = s.store.documents("Curators");
    assert_eq!(curators.len(), 1);
    assert_eq!(curators[0]["username"], "x");
    assert_eq!(curators[0]["sum"], 5.0);
    assert_eq!(curators[0]["currency"], "TOKEN");

    let names = QueueNames::default();
    let mut results = s.queue.strings(&names.results(Direction::Forward));
    results.sort();
    assert_eq!(results, vec!["10", "11"]);

    pipeline.consolidator().consolidate_once().await.unwrap();
    assert_eq!(pipeline.checkpoints().load().await.unwrap().last_block, 11);
}

#[tokio::test]
async fn untagged_comment_is_not_materialised() {
    let s = Setup::new(11, |c| c.scraper.backward = false);
    s.ledger.insert_post(root("a", "p1"));
    let ops = vec![
        op(json!({"type": "comment", "block_num": 10, "author": "a", "permlink": "p1", "parent_author": ""})),
        op(json!({"type": "vote", "block_num": 10, "voter": "b", "author": "a", "permlink": "p1", "weight": 5000})),
        op(json!({"type": "transfer", "block_num": 11, "from": "x", "to": "watched", "amount": "5.000 TOKEN"})),
    ];

    let pipeline = s.pipeline();
    let producer = pipeline.producers().next().unwrap();
    let pushed = producer.scan(stream::iter(ops.into_iter().map(Ok))).await.unwrap();
    assert_eq!(pushed, 1);

    let worker = pipeline.workers().next().unwrap();
    while worker.poll_once().await.unwrap() {}

    assert_eq!(s.store.count("Posts"), 0);
    assert_eq!(s.store.count("Comments"), 0);
    assert_eq!(s.store.count("Curators"), 1);
    assert_eq!(s.queue.strings(&QueueNames::default().results(Direction::Forward)), vec!["11"]);
}

#[tokio::test]
async fn root_upsert_materialises_the_whole_thread() {
    let s = Setup::new(10, |_| {});
    s.ledger.insert_post(root("a", "p1"));
    s.ledger.insert_post(reply("b", "r1", "@a/p1", ("a", "p1")));
    s.ledger.insert_post(reply("c", "r2", "@a/p1", ("a", "p1")));
    s.ledger.insert_post(reply("d", "r3", "@b/r1", ("a", "p1")));

    let stats = s.upserter().upsert("@a/p1", &steepshot(), None).await;

    assert_eq!(stats.failures, 0);
    assert_eq!(s.store.count("Posts"), 1);
    assert_eq!(s.store.count("Comments"), 3);
}

#[tokio::test]
async fn independent_reply_materialises_its_root() {
    let s = Setup::new(10, |_| {});
    s.ledger.insert_post(root("a", "p1"));
    s.ledger.insert_post(reply("b", "r1", "@a/p1", ("a", "p1")));

    s.upserter().upsert("@b/r1", &steepshot(), None).await;

    assert!(s.store.get("Comments", "@b/r1").is_some());
    assert!(s.store.get("Posts", "@a/p1").is_some());
}

#[tokio::test]
async fn redelivered_block_leaves_the_same_state() {
    let s = Setup::new(20, |c| c.scraper.backward = false);
    s.ledger.insert_post(root("a", "p1"));
    s.ledger.insert_post(reply("b", "r1", "@a/p1", ("a", "p1")));
    let ops = vec![
        op(json!({
            "type": "comment", "block_num": 12, "author": "a", "permlink": "p1",
            "parent_author": "", "parent_permlink": "photo",
            "json_metadata": "{\"app\": \"steepshot/0.1\"}"
        })),
        op(json!({"type": "transfer", "block_num": 12, "from": "x", "to": "watched", "amount": "2.500 TOKEN"})),
    ];

    let pipeline = s.pipeline();
    let producer = pipeline.producers().next().unwrap();
    let worker = pipeline.workers().next().unwrap();

    producer.scan(stream::iter(ops.clone().into_iter().map(Ok))).await.unwrap();
    while worker.poll_once().await.unwrap() {}
    let posts = s.store.documents("Posts");
    let comments = s.store.documents("Comments");

    producer.scan(stream::iter(ops.into_iter().map(Ok))).await.unwrap();
    while worker.poll_once().await.unwrap() {}

    assert_eq!(s.store.documents("Posts"), posts);
    assert_eq!(s.store.documents("Comments"), comments);
    assert_eq!(s.store.count("Curators"), 1);
}

#[tokio::test]
async fn backward_scan_does_not_reroute_tracked_posts() {
    let s = Setup::new(10, |_| {});
    let routing = RoutingFilter::new(
        s.store.clone(),
        Arc::new(AppRoutingTable::from_config(&s.config)),
        RetryPolicy::immediate(1),
    );
    s.upserter().upsert("@a/p1", &steepshot(), Some(root("a", "p1"))).await;
    let vote = op(json!({"type": "vote", "block_num": 3, "voter": "v", "author": "a", "permlink": "p1", "weight": 1}));

    let forward = routing.apps_for(&vote, Some("@a/p1"), None, Direction::Forward).await;
    let backward = routing.apps_for(&vote, Some("@a/p1"), None, Direction::Backward).await;

    assert_eq!(forward, steepshot());
    assert!(backward.is_empty());
}

#[tokio::test]
async fn vanished_content_becomes_a_deletion_marker() {
    let s = Setup::new(10, |_| {});
    s.upserter().upsert("@a/p1", &steepshot(), Some(root("a", "p1"))).await;

    s.upserter().upsert("@a/p1", &steepshot(), None).await;

    let doc = s.store.get("Posts", "@a/p1").unwrap();
    assert!(is_deleted(&doc));
    assert_eq!(doc["title"], "a photo");
}

#[tokio::test]
async fn stalled_checkpoint_moves_the_start_by_one_block() {
    let s = Setup::new(50, |c| {
        c.scraper.skip_freq = 3;
        c.scraper.forward = false;
    });
    let settings = DocumentCheckpointStore::new(s.store.clone(), s.config.collections.settings.clone());
    settings.save(&Checkpoint::new(1, 40)).await.unwrap();

    let pipeline = s.pipeline();
    let producer = pipeline.producers().next().unwrap();
    let mut stalls = StallTracker::new(s.config.scraper.skip_freq);
    let mut starts = Vec::new();
    for _ in 0..4 {
        starts.push(producer.start_block(&mut stalls).await.unwrap());
    }

    assert_eq!(starts, vec![40, 40, 40, 39]);
}

#[tokio::test]
async fn spawned_backward_pipeline_consolidates_to_block_one() {
    let s = Setup::new(6, |c| c.scraper.forward = false);
    for block in 1..=6 {
        s.ledger.push_operation(op(json!({
            "type": "transfer", "block_num": block, "from": "x", "to": "y", "amount": "0.001 STEEM"
        })));
    }

    let settings = DocumentCheckpointStore::new(s.store.clone(), s.config.collections.settings.clone());
    settings.save(&Checkpoint::new(1, 7)).await.unwrap();

    let pipeline = s.pipeline();
    let checkpoints = pipeline.checkpoints().clone();
    let handle = pipeline.spawn();

    let mut seen = Vec::new();
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let cp = checkpoints.load().await.unwrap();
            seen.push(cp.last_reversed_block);
            if cp.last_reversed_block == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.shutdown().await;

    assert!(reached.is_ok(), "checkpoint stuck at {seen:?}");
    assert_eq!(seen[0], 7);
    assert!(seen.windows(2).all(|w| w[1] <= w[0]), "backward checkpoint went up: {seen:?}");
    assert_eq!(s.queue.len(&QueueNames::default().results(Direction::Backward)).await.unwrap(), 0);
}
