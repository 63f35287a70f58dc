//! Checkpoint consolidator: turns worker completion reports into checkpoint
//! progress.
//!
//! Workers finish blocks out of order. Each round reads every entry of a
//! result list, moves the checkpoint to the furthest block reported (highest
//! forward, lowest backward) if that is progress, and then removes the
//! entries it read. Reports behind the checkpoint are simply dropped.

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::types::{Direction, QueueNames};

/// Outcome of one pass over one result list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Entries read from the list.
    pub entries: usize,
    /// Whether the checkpoint moved.
    pub advanced: bool,
}

pub struct Consolidator {
    queue: Arc<dyn WorkQueue>,
    checkpoints: CheckpointManager,
    names: QueueNames,
    directions: Vec<Direction>,
    idle: Duration,
}

impl Consolidator {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        checkpoints: CheckpointManager,
        names: QueueNames,
        directions: Vec<Direction>,
        idle: Duration,
    ) -> Self {
        Self { queue, checkpoints, names, directions, idle }
    }

    /// Consolidate forever, sleeping while both result lists are empty.
    pub async fn run(&self) {
        tracing::info!(directions = ?self.directions, "consolidator started");
        loop {
            match self.consolidate_once().await {
                Ok(0) => tokio::time::sleep(self.idle).await,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "consolidation round failed");
                    tokio::time::sleep(self.idle).await;
                }
            }
        }
    }

    /// One round over every direction. Returns the number of entries consumed.
    pub async fn consolidate_once(&self) -> Result<usize> {
        let mut total = 0;
        for direction in &self.directions {
            total += self.consolidate(*direction).await?.entries;
        }
        Ok(total)
    }

    async fn consolidate(&self, direction: Direction) -> Result<RoundSummary> {
        let list = self.names.results(direction);
        let raw = self.queue.snapshot(&list).await?;
        if raw.is_empty() {
            return Ok(RoundSummary::default());
        }

        let mut blocks: Vec<u64> = Vec::with_capacity(raw.len());
        for entry in &raw {
            match parse_entry(entry) {
                Some(block) => blocks.push(block),
                None => tracing::warn!(list = %list, entry = %String::from_utf8_lossy(entry), "discarding malformed result entry"),
            }
        }
        blocks.sort_unstable();

        let furthest = match direction {
            Direction::Forward => blocks.last(),
            Direction::Backward => blocks.first(),
        };
        let mut advanced = false;
        if let Some(&block) = furthest {
            let (checkpoint, moved) = self.checkpoints.advance(direction, block).await?;
            advanced = moved;
            log_round(direction, &checkpoint, blocks.len(), moved);
        }

        // Saved first, removed second: a crash in between only re-reads entries.
        let mut seen: Vec<&[u8]> = Vec::with_capacity(raw.len());
        for entry in &raw {
            if !seen.contains(&entry.as_slice()) {
                seen.push(entry);
                self.queue.remove(&list, entry).await?;
            }
        }
        Ok(RoundSummary { entries: raw.len(), advanced })
    }
}

fn parse_entry(entry: &[u8]) -> Option<u64> {
    std::str::from_utf8(entry).ok()?.trim().parse().ok()
}

fn log_round(direction: Direction, checkpoint: &Checkpoint, entries: usize, moved: bool) {
    let position = checkpoint.position(direction);
    if moved {
        tracing::info!(%direction, block = position, entries, "checkpoint advanced");
    } else {
        tracing::debug!(%direction, block = position, entries, "results already consolidated");
    }
}
