//! Inspector: periodic status report of queue depths and checkpoint.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::types::{Direction, QueueNames};

/// Lengths of one direction's work and result lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectionDepth {
    pub direction: Direction,
    /// Blocks waiting for a worker.
    pub blocks: u64,
    /// Processed blocks waiting for the consolidator.
    pub results: u64,
}

/// A point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub checkpoint: Checkpoint,
    pub queues: Vec<DirectionDepth>,
}

impl StatusReport {
    pub fn depth(&self, direction: Direction) -> Option<&DirectionDepth> {
        self.queues.iter().find(|d| d.direction == direction)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "checkpoint: forward={} backward={}",
            self.checkpoint.last_block, self.checkpoint.last_reversed_block
        )?;
        for depth in &self.queues {
            writeln!(f, "{:<8} blocks={:<6} results={}", depth.direction, depth.blocks, depth.results)?;
        }
        Ok(())
    }
}

pub struct Inspector {
    queue: Arc<dyn WorkQueue>,
    names: QueueNames,
    checkpoints: CheckpointManager,
    interval: Duration,
}

impl Inspector {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        names: QueueNames,
        checkpoints: CheckpointManager,
        interval: Duration,
    ) -> Self {
        Self { queue, names, checkpoints, interval }
    }

    pub async fn report(&self) -> Result<StatusReport> {
        let checkpoint = self.checkpoints.load().await?;
        let mut queues = Vec::with_capacity(Direction::ALL.len());
        for direction in Direction::ALL {
            queues.push(DirectionDepth {
                direction,
                blocks: self.queue.len(&self.names.blocks(direction)).await?,
                results: self.queue.len(&self.names.results(direction)).await?,
            });
        }
        Ok(StatusReport { checkpoint, queues })
    }

    /// Log a report every interval. Never returns.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.report().await {
                Ok(report) => {
                    for depth in &report.queues {
                        tracing::info!(
                            direction = %depth.direction,
                            blocks = depth.blocks,
                            results = depth.results,
                            checkpoint = report.checkpoint.position(depth.direction),
                            "pipeline status"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "status report failed"),
            }
        }
    }
}
