//! Checkpoint manager: persists the two read cursors for crash recovery.
//!
//! A checkpoint stores the last fully consolidated block in each direction.
//! On restart each producer resumes from its cursor rather than re-reading
//! history from scratch. The consolidator is the only writer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ScraperError};
use crate::store::{DocFilter, Document, DocumentStore};
use crate::types::Direction;

/// Identifier of the checkpoint document in the settings collection.
pub const CHECKPOINT_IDENTIFIER: &str = "checkpoint";

/// The persisted read cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest forward block fully consolidated.
    pub last_block: u64,
    /// Lowest backward block fully consolidated.
    pub last_reversed_block: u64,
    /// Whether the backward cursor has moved at least once. A started cursor
    /// resting at block 1 means the backfill is done, not "start at head".
    #[serde(default)]
    pub backfill_started: bool,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            last_block: Self::INITIAL,
            last_reversed_block: Self::INITIAL,
            backfill_started: false,
        }
    }
}

impl Checkpoint {
    /// Value of an untouched cursor: "empty history, start at the chain head".
    pub const INITIAL: u64 = 1;

    /// A checkpoint with explicit cursors. A backward cursor other than
    /// [`Self::INITIAL`] counts as started.
    pub fn new(last_block: u64, last_reversed_block: u64) -> Self {
        Self {
            last_block,
            last_reversed_block,
            backfill_started: last_reversed_block != Self::INITIAL,
        }
    }

    pub fn position(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Forward => self.last_block,
            Direction::Backward => self.last_reversed_block,
        }
    }

    pub fn is_initial(&self, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.last_block == Self::INITIAL,
            Direction::Backward => !self.backfill_started,
        }
    }

    /// Returns `true` once the backfill has been consolidated down to block 1.
    /// A forward cursor is never complete.
    pub fn is_complete(&self, direction: Direction) -> bool {
        direction == Direction::Backward && self.backfill_started && self.last_reversed_block == 1
    }

    /// Move the cursor to `block` if that is progress in `direction`.
    ///
    /// Forward only increases. Backward only decreases once started; the
    /// first backward report is accepted whatever its value. Returns `true`
    /// if the cursor moved.
    pub fn advance(&mut self, direction: Direction, block: u64) -> bool {
        let first_backward = direction == Direction::Backward && !self.backfill_started;
        if !first_backward && !direction.is_beyond(block, self.position(direction)) {
            return false;
        }
        match direction {
            Direction::Forward => self.last_block = block,
            Direction::Backward => {
                self.last_reversed_block = block;
                self.backfill_started = true;
            }
        }
        true
    }

    /// Block a producer should start scanning from. An initial cursor starts
    /// at `head`; otherwise the scan resumes at the cursor itself.
    pub fn start_block(&self, direction: Direction, head: u64) -> u64 {
        if self.is_initial(direction) {
            head.max(1)
        } else {
            self.position(direction)
        }
    }
}

/// Trait for storing and loading the checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint; a missing one is [`Checkpoint::default`].
    async fn load(&self) -> Result<Checkpoint>;

    /// Save (upsert) the checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

// ─── Document-store backed ────────────────────────────────────────────────────

/// Checkpoint kept as one document in the settings collection.
pub struct DocumentCheckpointStore {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl DocumentCheckpointStore {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self { store, collection: collection.into() }
    }
}

#[async_trait]
impl CheckpointStore for DocumentCheckpointStore {
    async fn load(&self) -> Result<Checkpoint> {
        let Some(doc) = self.store.find_one(&self.collection, &DocFilter::identifier(CHECKPOINT_IDENTIFIER)).await? else {
            return Ok(Checkpoint::default());
        };
        let field = |name: &str| -> Result<u64> {
            match doc.get(name) {
                None | Some(Value::Null) => Ok(Checkpoint::INITIAL),
                Some(v) => v
                    .as_u64()
                    .ok_or_else(|| ScraperError::Codec(format!("checkpoint field '{name}' is not a block number: {v}"))),
            }
        };
        let mut checkpoint = Checkpoint::new(field("last_block")?, field("last_reversed_block")?);
        if let Some(started) = doc.get("backfill_started").and_then(Value::as_bool) {
            checkpoint.backfill_started = started;
        }
        Ok(checkpoint)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut doc = Document::new();
        doc.insert("last_block".into(), checkpoint.last_block.into());
        doc.insert("last_reversed_block".into(), checkpoint.last_reversed_block.into());
        doc.insert("backfill_started".into(), checkpoint.backfill_started.into());
        self.store.update_one(&self.collection, CHECKPOINT_IDENTIFIER, &doc, true).await
    }
}

// ─── Manager ──────────────────────────────────────────────────────────────────

/// Reads and advances the checkpoint.
///
/// Every advance re-reads the persisted value first so an external reset is
/// picked up on the next consolidation round.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Checkpoint> {
        self.store.load().await
    }

    /// Advance the cursor of `direction` to `block` when that is progress,
    /// persisting the result. Returns the checkpoint as it now stands and
    /// whether it moved.
    pub async fn advance(&self, direction: Direction, block: u64) -> Result<(Checkpoint, bool)> {
        let mut checkpoint = self.store.load().await?;
        let moved = checkpoint.advance(direction, block);
        if moved {
            self.store.save(&checkpoint).await?;
            tracing::debug!(%direction, block, "checkpoint advanced");
        }
        Ok((checkpoint, moved))
    }

    /// Put both cursors back to their initial value.
    pub async fn reset(&self) -> Result<()> {
        self.store.save(&Checkpoint::default()).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and dry runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<Checkpoint>,
    saves: Mutex<u32>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(checkpoint: Checkpoint) -> Self {
        Self { data: Mutex::new(checkpoint), saves: Mutex::new(0) }
    }

    /// Number of `save` calls so far.
    pub fn saves(&self) -> u32 {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Checkpoint> {
        Ok(*self.data.lock().unwrap())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.data.lock().unwrap() = *checkpoint;
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
