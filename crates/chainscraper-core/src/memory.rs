//! In-memory backends for the ledger, document store, queue and notifier.
//!
//! Useful for testing and dry runs. All data is lost when the process exits.
//! Each backend can be told to fail a number of upcoming calls with a
//! transient error to exercise the retry paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Result, ScraperError};
use crate::ledger::{Ledger, Post};
use crate::notify::{EventPayload, Notifier};
use crate::operation::Operation;
use crate::queue::WorkQueue;
use crate::store::{DocFilter, Document, DocumentStore, IDENTIFIER_FIELD, RECORD_KEY_FIELD};

// ─── Ledger ───────────────────────────────────────────────────────────────────

/// In-memory ledger with a settable head block.
#[derive(Default)]
pub struct MemoryLedger {
    head: Mutex<u64>,
    blocks: Mutex<BTreeMap<u64, Vec<Operation>>>,
    content: Mutex<BTreeMap<String, Post>>,
    block_failures: Mutex<HashMap<u64, u32>>,
    content_failures: Mutex<HashMap<String, u32>>,
}

impl MemoryLedger {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }

    /// Append an operation to its block.
    pub fn push_operation(&self, op: Operation) {
        self.blocks.lock().unwrap().entry(op.block_num).or_default().push(op);
    }

    /// Store (or replace) a post or comment.
    pub fn insert_post(&self, post: Post) {
        let id = post.identifier().to_string();
        self.content.lock().unwrap().insert(id, post);
    }

    pub fn remove_post(&self, identifier: &str) {
        self.content.lock().unwrap().remove(identifier);
    }

    /// Fail the next `times` reads of `block_num` with a transient error.
    pub fn fail_block(&self, block_num: u64, times: u32) {
        self.block_failures.lock().unwrap().insert(block_num, times);
    }

    /// Fail the next `times` content lookups of `identifier` with a transient error.
    pub fn fail_content(&self, identifier: &str, times: u32) {
        self.content_failures.lock().unwrap().insert(identifier.to_string(), times);
    }

    fn take_failure<K: std::hash::Hash + Eq>(failures: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
        let mut failures = failures.lock().unwrap();
        match failures.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn current_block_num(&self) -> Result<u64> {
        Ok(*self.head.lock().unwrap())
    }

    async fn operations_in_block(&self, block_num: u64) -> Result<Vec<Operation>> {
        if Self::take_failure(&self.block_failures, &block_num) {
            return Err(ScraperError::Ledger(format!("block {block_num} unavailable")));
        }
        Ok(self.blocks.lock().unwrap().get(&block_num).cloned().unwrap_or_default())
    }

    async fn get_content(&self, identifier: &str) -> Result<Option<Post>> {
        if Self::take_failure(&self.content_failures, &identifier.to_string()) {
            return Err(ScraperError::Ledger(format!("empty answer for {identifier}")));
        }
        Ok(self.content.lock().unwrap().get(identifier).cloned())
    }

    async fn get_replies(&self, identifier: &str) -> Result<Vec<Post>> {
        let content = self.content.lock().unwrap();
        let mut replies = Vec::new();
        let mut pending = vec![identifier.to_string()];
        while let Some(parent) = pending.pop() {
            for post in content.values() {
                let doc = post.as_document();
                let parent_author = doc.get("parent_author").and_then(Value::as_str).unwrap_or_default();
                let parent_permlink = doc.get("parent_permlink").and_then(Value::as_str).unwrap_or_default();
                if !parent_author.is_empty() && format!("@{parent_author}/{parent_permlink}") == parent {
                    pending.push(post.identifier().to_string());
                    replies.push(post.clone());
                }
            }
        }
        Ok(replies)
    }
}

// ─── Document store ───────────────────────────────────────────────────────────

/// In-memory document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    read_failures: Mutex<u32>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` `find_one` calls with a transient error.
    pub fn fail_reads(&self, times: u32) {
        *self.read_failures.lock().unwrap() = times;
    }

    /// All documents in a collection, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections.lock().unwrap().get(collection).cloned().unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections.lock().unwrap().get(collection).map_or(0, Vec::len)
    }

    /// Fetch a document by identifier regardless of its deleted marker.
    pub fn get(&self, collection: &str, identifier: &str) -> Option<Document> {
        let filter = DocFilter::identifier(identifier);
        self.documents(collection).into_iter().find(|d| filter.matches(d))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &DocFilter) -> Result<Option<Document>> {
        {
            let mut failures = self.read_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ScraperError::Storage("connection reset".into()));
            }
        }
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn update_one(&self, collection: &str, identifier: &str, doc: &Document, upsert: bool) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        let filter = DocFilter::identifier(identifier);
        match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => {
                for (k, v) in doc {
                    existing.insert(k.clone(), v.clone());
                }
            }
            None if upsert => {
                let mut created = doc.clone();
                created.insert(IDENTIFIER_FIELD.into(), Value::String(identifier.to_string()));
                docs.push(created);
            }
            None => {}
        }
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: &Document) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(key) = doc.get(RECORD_KEY_FIELD) {
            if docs.iter().any(|d| d.get(RECORD_KEY_FIELD) == Some(key)) {
                return Err(ScraperError::DuplicateKey { collection: collection.to_string() });
            }
        }
        docs.push(doc.clone());
        Ok(())
    }
}

// ─── Queue ────────────────────────────────────────────────────────────────────

/// In-memory named lists.
#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values in a list decoded as UTF-8, head first.
    pub fn strings(&self, list: &str) -> Vec<String> {
        self.lists
            .lock()
            .unwrap()
            .get(list)
            .map(|l| l.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, list: &str, value: Vec<u8>) -> Result<()> {
        self.lists.lock().unwrap().entry(list.to_string()).or_default().push_front(value);
        Ok(())
    }

    async fn pop(&self, list: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lists.lock().unwrap().get_mut(list).and_then(VecDeque::pop_front))
    }

    async fn len(&self, list: &str) -> Result<u64> {
        Ok(self.lists.lock().unwrap().get(list).map_or(0, |l| l.len() as u64))
    }

    async fn snapshot(&self, list: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, list: &str, value: &[u8]) -> Result<()> {
        if let Some(l) = self.lists.lock().unwrap().get_mut(list) {
            l.retain(|v| v.as_slice() != value);
        }
        Ok(())
    }
}

// ─── Notifier ─────────────────────────────────────────────────────────────────

/// Records every delivered payload.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<EventPayload>>,
    failing: Mutex<bool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail (or succeed again).
    pub fn fail_all(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn sent(&self) -> Vec<EventPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, payload: &EventPayload) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(ScraperError::Notification("sink unavailable".into()));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
