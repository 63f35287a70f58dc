//! Ledger client abstraction and the lazy operation history built on it.
//!
//! The ledger is read block by block; [`history`] flattens those per-block
//! fetches into one ordered stream of operations, ascending in forward mode
//! (waiting at the head for new blocks) and descending down to block 1 in
//! backward mode.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::error::{Result, ScraperError};
use crate::operation::{format_identifier, Operation};
use crate::store::{Document, IDENTIFIER_FIELD};
use crate::types::Direction;

/// Trait for reading ledger state.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Number of the newest block the scraper may read.
    async fn current_block_num(&self) -> Result<u64>;

    /// Every operation (virtual ones included) in `block_num`, in ledger order.
    async fn operations_in_block(&self, block_num: u64) -> Result<Vec<Operation>>;

    /// Current state of a post or comment. `Ok(None)` means the ledger has no
    /// such content; a transient empty/invalid answer is an `Err`.
    async fn get_content(&self, identifier: &str) -> Result<Option<Post>>;

    /// Every descendant of a post or comment, depth first.
    async fn get_replies(&self, identifier: &str) -> Result<Vec<Post>>;
}

/// Lazy operation stream starting at `start` and moving in `direction`.
///
/// Forward streams never end; when the scan reaches the head they poll
/// [`Ledger::current_block_num`] every `poll` until a new block appears.
/// Backward streams end after block 1.
pub fn history(
    ledger: Arc<dyn Ledger>,
    start: u64,
    direction: Direction,
    poll: Duration,
) -> BoxStream<'static, Result<Operation>> {
    let state = (Some(start.max(1)), 0u64);
    stream::try_unfold(state, move |(next, mut head)| {
        let ledger = ledger.clone();
        async move {
            let Some(block) = next else {
                return Ok::<_, ScraperError>(None);
            };
            if direction.is_forward() {
                while block > head {
                    head = ledger.current_block_num().await?;
                    if block > head {
                        tokio::time::sleep(poll).await;
                    }
                }
            }
            let ops = ledger.operations_in_block(block).await?;
            let following = match direction {
                Direction::Forward => Some(block + 1),
                Direction::Backward if block > 1 => Some(block - 1),
                Direction::Backward => None,
            };
            Ok(Some((ops, (following, head))))
        }
    })
    .map_ok(|ops| stream::iter(ops.into_iter().map(Ok::<Operation, ScraperError>)))
    .try_flatten()
    .boxed()
}

// ─── Post ─────────────────────────────────────────────────────────────────────

/// A post or comment as returned by the ledger: a free-form document with a
/// few well-known fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    doc: Document,
}

impl Post {
    /// Wrap a ledger document, filling in `identifier` from `author`/`permlink`
    /// when the ledger did not supply it.
    pub fn from_document(mut doc: Document) -> Self {
        if !doc.contains_key(IDENTIFIER_FIELD) {
            let author = str_field(&doc, "author").to_string();
            let permlink = str_field(&doc, "permlink").to_string();
            if !author.is_empty() {
                doc.insert(IDENTIFIER_FIELD.into(), Value::String(format_identifier(&author, &permlink)));
            }
        }
        Self { doc }
    }

    pub fn identifier(&self) -> &str {
        str_field(&self.doc, IDENTIFIER_FIELD)
    }

    pub fn author(&self) -> &str {
        str_field(&self.doc, "author")
    }

    pub fn body(&self) -> &str {
        str_field(&self.doc, "body")
    }

    /// A root post has no parent author.
    pub fn is_root(&self) -> bool {
        str_field(&self.doc, "parent_author").is_empty()
    }

    /// Identifier of the root post of the thread this content belongs to.
    pub fn root_identifier(&self) -> Option<String> {
        if self.is_root() {
            return Some(self.identifier().to_string());
        }
        let author = str_field(&self.doc, "root_author");
        let permlink = str_field(&self.doc, "root_permlink");
        (!author.is_empty() && !permlink.is_empty()).then(|| format_identifier(author, permlink))
    }

    /// Applications named in the post's metadata.
    pub fn apps(&self) -> BTreeSet<String> {
        match self.doc.get("json_metadata") {
            Some(Value::String(raw)) => crate::operation::apps_from_metadata(raw),
            Some(meta @ Value::Object(_)) => crate::operation::apps_from_metadata(&meta.to_string()),
            _ => BTreeSet::new(),
        }
    }

    pub fn as_document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }
}

fn str_field<'a>(doc: &'a Document, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or_default()
}
