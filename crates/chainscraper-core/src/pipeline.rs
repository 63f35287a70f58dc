//! Pipeline assembly: builds every component from one configuration and runs
//! them as tokio tasks.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::checkpoint::{CheckpointManager, DocumentCheckpointStore};
use crate::config::ScraperConfig;
use crate::consolidator::Consolidator;
use crate::error::Result;
use crate::filter::OperationFilter;
use crate::inspector::Inspector;
use crate::ledger::Ledger;
use crate::notify::Notifier;
use crate::producer::{BlockProducer, ProducerSettings};
use crate::queue::WorkQueue;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::routing::{AppRoutingTable, RoutingFilter};
use crate::store::DocumentStore;
use crate::types::{Direction, QueueNames};
use crate::upsert::DocumentUpserter;
use crate::worker::{Worker, WorkerContext};

/// Identifies a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Producer(Direction),
    Worker(Direction, usize),
    Consolidator,
    Inspector,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer(direction) => write!(f, "producer[{direction}]"),
            Self::Worker(direction, id) => write!(f, "worker[{direction}#{id}]"),
            Self::Consolidator => f.write_str("consolidator"),
            Self::Inspector => f.write_str("inspector"),
        }
    }
}

/// A task that has ended.
#[derive(Debug)]
pub struct TaskExit {
    pub task: TaskKind,
    pub result: Result<()>,
}

/// Every long-running component, wired and ready to spawn.
pub struct Pipeline {
    checkpoints: CheckpointManager,
    producers: Vec<BlockProducer>,
    workers: Vec<(Direction, usize, Worker)>,
    consolidator: Consolidator,
    inspector: Inspector,
}

impl Pipeline {
    pub fn new(
        config: Arc<ScraperConfig>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn DocumentStore>,
        queue: Arc<dyn WorkQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let names = QueueNames::new(config.redis.key_prefix.clone());
        let directions = enabled_directions(&config);
        let store_retry = RetryPolicy::new(RetryConfig {
            max_retries: config.scraper.store_retries,
            ..RetryConfig::default()
        });
        let fetch_retry = RetryPolicy::new(RetryConfig {
            max_retries: config.scraper.fetch_attempts.saturating_sub(1),
            ..RetryConfig::default()
        });

        let table = Arc::new(AppRoutingTable::from_config(&config));
        let routing = RoutingFilter::new(store.clone(), table.clone(), store_retry.clone());
        let upserter = Arc::new(DocumentUpserter::new(
            ledger.clone(),
            store.clone(),
            table,
            fetch_retry,
            store_retry.clone(),
        ));
        let checkpoints = CheckpointManager::new(Arc::new(DocumentCheckpointStore::new(
            store.clone(),
            config.collections.settings.clone(),
        )));

        let filter = OperationFilter::new(config.clone(), routing.clone());
        let settings = ProducerSettings::from_config(&config.scraper);
        let producers = directions
            .iter()
            .map(|&direction| {
                BlockProducer::new(
                    direction,
                    ledger.clone(),
                    queue.clone(),
                    checkpoints.clone(),
                    filter.clone(),
                    &names,
                    settings.clone(),
                )
            })
            .collect();

        let ctx = Arc::new(WorkerContext {
            config: config.clone(),
            ledger,
            store,
            queue: queue.clone(),
            routing,
            upserter,
            notifier,
            names: names.clone(),
            store_retry,
        });
        let workers = directions
            .iter()
            .flat_map(|&direction| {
                let ctx = ctx.clone();
                (0..config.scraper.workers_per_direction)
                    .map(move |id| (direction, id, Worker::new(id, direction, ctx.clone())))
            })
            .collect();

        let consolidator = Consolidator::new(
            queue.clone(),
            checkpoints.clone(),
            names.clone(),
            directions,
            config.scraper.consolidator_idle(),
        );
        let inspector = Inspector::new(queue, names, checkpoints.clone(), config.scraper.inspector_interval());

        Self { checkpoints, producers, workers, consolidator, inspector }
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    pub fn producers(&self) -> impl Iterator<Item = &BlockProducer> {
        self.producers.iter()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter().map(|(_, _, worker)| worker)
    }

    /// Spawn every component onto the current runtime.
    pub fn spawn(self) -> PipelineHandle {
        let mut tasks = JoinSet::new();
        for producer in self.producers {
            let task = TaskKind::Producer(producer.direction());
            tasks.spawn(async move {
                let result = producer.run().await;
                TaskExit { task, result }
            });
        }
        let worker_count = self.workers.len();
        for (direction, id, worker) in self.workers {
            tasks.spawn(async move {
                worker.run().await;
                TaskExit { task: TaskKind::Worker(direction, id), result: Ok(()) }
            });
        }
        let consolidator = self.consolidator;
        tasks.spawn(async move {
            consolidator.run().await;
            TaskExit { task: TaskKind::Consolidator, result: Ok(()) }
        });
        let inspector = self.inspector;
        tasks.spawn(async move {
            inspector.run().await;
            TaskExit { task: TaskKind::Inspector, result: Ok(()) }
        });
        tracing::info!(workers = worker_count, tasks = tasks.len(), "pipeline started");
        PipelineHandle { tasks }
    }
}

/// Directions the configuration enables, forward first.
pub fn enabled_directions(config: &ScraperConfig) -> Vec<Direction> {
    Direction::ALL
        .into_iter()
        .filter(|direction| match direction {
            Direction::Forward => config.scraper.forward,
            Direction::Backward => config.scraper.backward,
        })
        .collect()
}

/// Handle over the spawned tasks.
pub struct PipelineHandle {
    tasks: JoinSet<TaskExit>,
}

impl PipelineHandle {
    /// Number of tasks still tracked.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to end. Panics are logged and skipped.
    pub async fn next_exit(&mut self) -> Option<TaskExit> {
        loop {
            match self.tasks.join_next().await? {
                Ok(exit) => {
                    match &exit.result {
                        Ok(()) => tracing::info!(task = %exit.task, "task finished"),
                        Err(e) => tracing::error!(task = %exit.task, error = %e, "task failed"),
                    }
                    return Some(exit);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(error = %e, "task panicked"),
            }
        }
    }

    /// Wait until every task has ended. A failed producer only stops its own
    /// direction; the remaining tasks keep running.
    pub async fn wait(&mut self) {
        while self.next_exit().await.is_some() {}
    }

    /// Abort every task and wait for them to unwind.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        tracing::info!("pipeline stopped");
    }
}
