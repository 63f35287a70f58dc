//! Error types for the chainscraper pipeline.

use thiserror::Error;

use crate::types::Direction;

/// Errors that can occur while scraping and materialising ledger data.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    /// A record with the same unique key already exists.
    #[error("Duplicate key in collection '{collection}'")]
    DuplicateKey { collection: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Validation failed for '{identifier}': {reason}")]
    Validation { identifier: String, reason: String },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recursion limit reached while upserting '{identifier}'")]
    RecursionLimit { identifier: String },

    #[error("Producer ({direction}) gave up after {attempts} attempts")]
    Exhausted { direction: Direction, attempts: u32 },
}

impl ScraperError {
    /// Returns `true` for transient I/O failures that are worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Storage(_) | Self::Queue(_))
    }

    /// Returns `true` if the error is a duplicate-key insert.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

impl From<serde_json::Error> for ScraperError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
