//! Shared types for the scraping pipeline.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::operation::Operation;

// ─── Direction ────────────────────────────────────────────────────────────────

/// The scan direction of a producer and its worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increasing block numbers, following the chain head.
    Forward,
    /// Decreasing block numbers, back-filling history down to block 1.
    Backward,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Backward];

    pub fn is_forward(self) -> bool {
        matches!(self, Self::Forward)
    }

    /// Move `block` by `n` blocks in this direction. Backward never goes below block 1.
    pub fn advance(self, block: u64, n: u64) -> u64 {
        match self {
            Self::Forward => block.saturating_add(n),
            Self::Backward => block.saturating_sub(n).max(1),
        }
    }

    /// Returns `true` if `candidate` lies strictly further along this direction than `current`.
    pub fn is_beyond(self, candidate: u64, current: u64) -> bool {
        match self {
            Self::Forward => candidate > current,
            Self::Backward => candidate < current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// Filtered operations sharing one ledger block number, in ledger order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_num: u64,
    pub operations: Vec<Operation>,
}

impl Block {
    pub fn new(block_num: u64) -> Self {
        Self { block_num, operations: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Serialize for the work queue.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ─── Queue names ──────────────────────────────────────────────────────────────

/// Names of the direction-scoped work and result lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    prefix: String,
}

impl QueueNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// List the producer pushes blocks onto and workers pop from.
    pub fn blocks(&self, direction: Direction) -> String {
        format!("{}:blocks:{direction}", self.prefix)
    }

    /// List workers report processed block numbers onto.
    pub fn results(&self, direction: Direction) -> String {
        format!("{}:results:{direction}", self.prefix)
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self::new("chainscraper")
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_advance() {
        assert_eq!(Direction::Forward.advance(100, 1), 101);
        assert_eq!(Direction::Backward.advance(100, 1), 99);
        assert_eq!(Direction::Backward.advance(1, 1), 1);
    }

    #[test]
    fn direction_is_beyond() {
        assert!(Direction::Forward.is_beyond(11, 10));
        assert!(!Direction::Forward.is_beyond(10, 10));
        assert!(Direction::Backward.is_beyond(9, 10));
        assert!(!Direction::Backward.is_beyond(11, 10));
    }

    #[test]
    fn queue_names_are_direction_scoped() {
        let names = QueueNames::new("steem");
        assert_eq!(names.blocks(Direction::Forward), "steem:blocks:forward");
        assert_eq!(names.results(Direction::Backward), "steem:results:backward");
        assert_ne!(names.blocks(Direction::Forward), names.blocks(Direction::Backward));
    }

    #[test]
    fn empty_block_decodes() {
        let block = Block::new(42);
        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded.block_num, 42);
        assert!(decoded.is_empty());
    }
}
