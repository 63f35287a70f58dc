//! Work/result queue abstraction over a named-list service.
//!
//! Delivery is at-least-once and unordered from the pipeline's point of view.
//! `push` adds to the head of the list and `pop` takes from the head, so pops
//! are LIFO.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, list: &str, value: Vec<u8>) -> Result<()>;

    /// Pop the most recently pushed value. `None` when the list is empty.
    async fn pop(&self, list: &str) -> Result<Option<Vec<u8>>>;

    async fn len(&self, list: &str) -> Result<u64>;

    /// All values currently in the list, head first, without removing them.
    async fn snapshot(&self, list: &str) -> Result<Vec<Vec<u8>>>;

    /// Remove every occurrence of `value` from the list.
    async fn remove(&self, list: &str, value: &[u8]) -> Result<()>;
}
