//! Steem/Golos JSON-RPC ledger client.
//!
//! Talks `condenser_api` over HTTP: `get_dynamic_global_properties` for the
//! head, `get_ops_in_block` for operations, `get_content` and
//! `get_content_replies` for posts. Calls rotate across the configured nodes
//! and are retried with the shared retry policy.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use chainscraper_core::config::ChainConfig;
use chainscraper_core::error::{Result, ScraperError};
use chainscraper_core::ledger::{Ledger, Post};
use chainscraper_core::operation::{parse_identifier, Operation};
use chainscraper_core::retry::{retry_async, RetryConfig, RetryPolicy};
use chainscraper_core::store::Document;

/// Configuration for [`SteemRpcLedger`].
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
    /// Report the last irreversible block as the head.
    pub irreversible_only: bool,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            irreversible_only: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// [`Ledger`] over a set of JSON-RPC nodes.
pub struct SteemRpcLedger {
    nodes: Vec<String>,
    http: reqwest::Client,
    retry: RetryPolicy,
    irreversible_only: bool,
    current: AtomicUsize,
    next_id: AtomicU64,
}

impl SteemRpcLedger {
    pub fn new(nodes: Vec<String>, config: RpcClientConfig) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ScraperError::Config("at least one ledger node is required".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScraperError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            nodes,
            http,
            retry: RetryPolicy::new(config.retry),
            irreversible_only: config.irreversible_only,
            current: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(chain: &ChainConfig) -> Result<Self> {
        Self::new(
            chain.nodes.clone(),
            RpcClientConfig { irreversible_only: chain.irreversible_only, ..RpcClientConfig::default() },
        )
    }

    /// Node the next call goes to.
    pub fn current_node(&self) -> &str {
        &self.nodes[self.current.load(Ordering::Relaxed) % self.nodes.len()]
    }

    /// Call `method` with `params`, failing over to the next node and retrying
    /// transient failures.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let params = &params;
        retry_async(&self.retry, method, move || async move {
            let node = self.current_node().to_string();
            let result = self.call_once(&node, method, params).await;
            if let Err(e) = &result {
                if e.is_transient() {
                    self.rotate(&node);
                }
            }
            result
        })
        .await
    }

    async fn call_once(&self, node: &str, method: &str, params: &Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let resp = self
            .http
            .post(node)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScraperError::Ledger(format!("{node}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ScraperError::Ledger(format!("{node}: HTTP {status}: {body}")));
        }

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ScraperError::Ledger(format!("{node}: invalid response: {e}")))?;
        if let Some(err) = body.error {
            return Err(ScraperError::Ledger(format!("{node}: {method} failed ({}): {}", err.code, err.message)));
        }
        body.result
            .ok_or_else(|| ScraperError::Ledger(format!("{node}: {method} returned no result")))
    }

    fn rotate(&self, failed: &str) {
        if self.nodes.len() < 2 {
            return;
        }
        let index = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % self.nodes.len();
        tracing::warn!(failed, next = %self.nodes[index], "switching ledger node");
    }

    async fn content_replies(&self, author: &str, permlink: &str) -> Result<Vec<Post>> {
        let result = self.call("condenser_api.get_content_replies", json!([author, permlink])).await?;
        let Value::Array(items) = result else {
            return Err(ScraperError::Ledger(format!("get_content_replies @{author}/{permlink}: expected an array")));
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(doc) => Some(Post::from_document(doc)),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl Ledger for SteemRpcLedger {
    async fn current_block_num(&self) -> Result<u64> {
        let props = self.call("condenser_api.get_dynamic_global_properties", json!([])).await?;
        let field = if self.irreversible_only { "last_irreversible_block_num" } else { "head_block_number" };
        props
            .get(field)
            .and_then(Value::as_u64)
            .ok_or_else(|| ScraperError::Ledger(format!("dynamic global properties lack {field}")))
    }

    async fn operations_in_block(&self, block_num: u64) -> Result<Vec<Operation>> {
        let result = self.call("condenser_api.get_ops_in_block", json!([block_num, false])).await?;
        let Value::Array(entries) = result else {
            return Err(ScraperError::Ledger(format!("get_ops_in_block {block_num}: expected an array")));
        };
        let mut ops = Vec::with_capacity(entries.len());
        for entry in entries {
            match operation_from_entry(block_num, entry) {
                Ok(op) => ops.push(op),
                Err(e) => tracing::warn!(block = block_num, error = %e, "skipping malformed operation"),
            }
        }
        Ok(ops)
    }

    async fn get_content(&self, identifier: &str) -> Result<Option<Post>> {
        let Some((author, permlink)) = parse_identifier(identifier) else {
            return Ok(None);
        };
        let result = self.call("condenser_api.get_content", json!([author, permlink])).await?;
        let Value::Object(doc) = result else {
            return Err(ScraperError::Ledger(format!("get_content {identifier}: expected an object")));
        };
        Ok(content_document(doc).map(Post::from_document))
    }

    async fn get_replies(&self, identifier: &str) -> Result<Vec<Post>> {
        let Some((author, permlink)) = parse_identifier(identifier) else {
            return Ok(Vec::new());
        };
        let mut replies = Vec::new();
        let mut visited = HashSet::from([identifier.to_string()]);
        let mut pending = VecDeque::from([(author.to_string(), permlink.to_string())]);
        while let Some((author, permlink)) = pending.pop_front() {
            for reply in self.content_replies(&author, &permlink).await? {
                if !visited.insert(reply.identifier().to_string()) {
                    tracing::warn!(identifier, reply = reply.identifier(), "reply seen twice, skipping");
                    continue;
                }
                let has_children = reply.as_document().get("children").and_then(Value::as_u64).unwrap_or(1) > 0;
                if has_children {
                    if let Some((a, p)) = parse_identifier(reply.identifier()) {
                        pending.push_back((a.to_string(), p.to_string()));
                    }
                }
                replies.push(reply);
            }
        }
        Ok(replies)
    }
}

/// `get_content` answers with an all-empty object for unknown content.
fn content_document(doc: Document) -> Option<Document> {
    let author = doc.get("author").and_then(Value::as_str).unwrap_or_default();
    (!author.is_empty()).then_some(doc)
}

/// Flatten one `get_ops_in_block` entry into the operation JSON shape:
/// `{"type", "block_num", "timestamp", "trx_id", ...fields}`.
///
/// Accepts both the legacy `["vote", {...}]` pair and the
/// `{"type": "vote_operation", "value": {...}}` form.
pub fn operation_from_entry(block_num: u64, entry: Value) -> Result<Operation> {
    let Value::Object(mut entry) = entry else {
        return Err(ScraperError::Codec("operation entry is not an object".into()));
    };
    let (op_type, fields) = match entry.remove("op") {
        Some(Value::Array(pair)) if pair.len() == 2 => {
            let mut pair = pair.into_iter();
            match (pair.next(), pair.next()) {
                (Some(Value::String(name)), Some(Value::Object(fields))) => (name, fields),
                _ => return Err(ScraperError::Codec("malformed [type, body] operation".into())),
            }
        }
        Some(Value::Object(mut op)) => match (op.remove("type"), op.remove("value")) {
            (Some(Value::String(name)), Some(Value::Object(fields))) => {
                (name.trim_end_matches("_operation").to_string(), fields)
            }
            _ => return Err(ScraperError::Codec("malformed {type, value} operation".into())),
        },
        _ => return Err(ScraperError::Codec("operation entry has no op".into())),
    };

    let mut flat = Map::with_capacity(fields.len() + 4);
    flat.extend(fields);
    flat.insert("type".into(), Value::String(op_type));
    flat.insert("block_num".into(), json!(entry.get("block").and_then(Value::as_u64).unwrap_or(block_num)));
    for key in ["timestamp", "trx_id"] {
        if let Some(Value::String(v)) = entry.remove(key) {
            flat.insert(key.into(), Value::String(v));
        }
    }
    Operation::from_json(Value::Object(flat))
}
