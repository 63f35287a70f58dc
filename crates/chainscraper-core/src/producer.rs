//! Block producer: reads ledger history in one direction and feeds the work
//! queue.
//!
//! # Scan
//! Operations are read in ledger order and grouped by `block_num`. When the
//! scan crosses into a new block, the pending block is pushed onto the
//! direction's work list if any of its operations passed the filter.
//!
//! # Attempts
//! Any failure ends the scan. The next attempt re-reads the checkpoint and
//! starts over from it. If the checkpoint has not moved for `skip_freq`
//! attempts in a row, the start position is pushed one more block along the
//! scan direction to get past a block that keeps failing. After
//! `max_attempts` failures the producer gives up.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::checkpoint::CheckpointManager;
use crate::config::PipelineConfig;
use crate::error::{Result, ScraperError};
use crate::filter::OperationFilter;
use crate::ledger::{history, Ledger};
use crate::operation::Operation;
use crate::queue::WorkQueue;
use crate::types::{Block, Direction, QueueNames};

/// Attempt bounds and pacing for a producer.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub max_attempts: u32,
    pub skip_freq: u32,
    /// Head polling interval in forward mode, and pause between attempts.
    pub poll_interval: Duration,
}

impl ProducerSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            skip_freq: config.skip_freq,
            poll_interval: config.polling_interval(),
        }
    }
}

/// Tracks how long the checkpoint has been stuck across attempts.
#[derive(Debug, Clone)]
pub struct StallTracker {
    skip_freq: u32,
    last_seen: Option<u64>,
    stalls: u32,
    skip: u64,
}

impl StallTracker {
    pub fn new(skip_freq: u32) -> Self {
        Self { skip_freq: skip_freq.max(1), last_seen: None, stalls: 0, skip: 0 }
    }

    /// Record the checkpoint seen at the start of an attempt and return how
    /// many blocks the attempt should skip past it.
    pub fn observe(&mut self, position: u64) -> u64 {
        if self.last_seen == Some(position) {
            self.stalls += 1;
            if self.stalls >= self.skip_freq {
                self.skip += 1;
                self.stalls = 0;
            }
        } else {
            self.last_seen = Some(position);
            self.stalls = 0;
            self.skip = 0;
        }
        self.skip
    }
}

/// One direction's producer.
pub struct BlockProducer {
    direction: Direction,
    ledger: Arc<dyn Ledger>,
    queue: Arc<dyn WorkQueue>,
    checkpoints: CheckpointManager,
    filter: OperationFilter,
    list: String,
    settings: ProducerSettings,
}

impl BlockProducer {
    pub fn new(
        direction: Direction,
        ledger: Arc<dyn Ledger>,
        queue: Arc<dyn WorkQueue>,
        checkpoints: CheckpointManager,
        filter: OperationFilter,
        names: &QueueNames,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            direction,
            ledger,
            queue,
            checkpoints,
            filter,
            list: names.blocks(direction),
            settings,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run attempts until a scan completes or `max_attempts` is reached.
    ///
    /// A forward scan only completes if the ledger stream ends, so in
    /// practice this returns only on exhaustion. A backward producer whose
    /// backfill is already consolidated down to block 1 returns at once.
    pub async fn run(&self) -> Result<()> {
        let mut stalls = StallTracker::new(self.settings.skip_freq);
        for attempt in 1..=self.settings.max_attempts {
            match self.attempt(&mut stalls, attempt).await {
                Ok(None) => {
                    tracing::info!(direction = %self.direction, "backfill already complete");
                    return Ok(());
                }
                Ok(Some(pushed)) => {
                    tracing::info!(direction = %self.direction, pushed, "finished scraping");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(direction = %self.direction, attempt, error = %e, "producer attempt failed");
                    if !self.settings.poll_interval.is_zero() {
                        tokio::time::sleep(self.settings.poll_interval).await;
                    }
                }
            }
        }
        let err = ScraperError::Exhausted { direction: self.direction, attempts: self.settings.max_attempts };
        tracing::error!(direction = %self.direction, error = %err, "producer stopped");
        Err(err)
    }

    /// One attempt. `None` when there is nothing left to scan.
    async fn attempt(&self, stalls: &mut StallTracker, attempt: u32) -> Result<Option<u64>> {
        if self.checkpoints.load().await?.is_complete(self.direction) {
            return Ok(None);
        }
        let start = self.start_block(stalls).await?;
        tracing::info!(direction = %self.direction, attempt, start, "fetching operations");
        self.run_from(start).await.map(Some)
    }

    /// Where the next attempt starts: the checkpoint (or the head for an
    /// untouched checkpoint), moved along by the current skip.
    pub async fn start_block(&self, stalls: &mut StallTracker) -> Result<u64> {
        let checkpoint = self.checkpoints.load().await?;
        let skip = stalls.observe(checkpoint.position(self.direction));
        let head = self.ledger.current_block_num().await?;
        let base = checkpoint.start_block(self.direction, head);
        let start = self.direction.advance(base, skip);
        if skip > 0 {
            tracing::warn!(direction = %self.direction, base, skip, start, "checkpoint stalled, skipping ahead");
        }
        Ok(start)
    }

    /// One scan of the ledger from `start_block`. Returns the number of
    /// blocks pushed.
    pub async fn run_from(&self, start_block: u64) -> Result<u64> {
        let ops = history(self.ledger.clone(), start_block, self.direction, self.settings.poll_interval);
        self.scan(ops).await
    }

    /// Group `ops` into blocks and push the non-empty ones.
    pub async fn scan<S>(&self, ops: S) -> Result<u64>
    where
        S: Stream<Item = Result<Operation>> + Unpin,
    {
        let mut ops = ops;
        let mut pending: Option<Block> = None;
        let mut pushed = 0u64;

        while let Some(op) = ops.next().await {
            let op = op?;
            let crossed = pending.as_ref().map_or(true, |b| b.block_num != op.block_num);
            if crossed {
                if let Some(block) = pending.take() {
                    pushed += self.flush(block).await?;
                }
                if op.block_num % 100 == 0 {
                    tracing::info!(direction = %self.direction, block = op.block_num, "scan progress");
                }
                pending = Some(Block::new(op.block_num));
            }
            if self.filter.accepts(&op, self.direction).await {
                if let Some(block) = pending.as_mut() {
                    block.operations.push(op);
                }
            }
        }
        if let Some(block) = pending.take() {
            pushed += self.flush(block).await?;
        }
        Ok(pushed)
    }

    async fn flush(&self, block: Block) -> Result<u64> {
        if block.is_empty() {
            return Ok(0);
        }
        self.queue.push(&self.list, block.encode()?).await?;
        tracing::debug!(direction = %self.direction, block = block.block_num, ops = block.operations.len(), "block queued");
        Ok(1)
    }
}
