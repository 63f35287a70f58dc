//! chainscraper-core: the scraping, routing and checkpointing pipeline.
//!
//! # Architecture
//!
//! ```text
//! Ledger ─► BlockProducer (forward / backward)
//!               │  OperationFilter ─► RoutingFilter
//!               ▼
//!           work list ─► Worker pool ─► DocumentUpserter ─► DocumentStore
//!                            │       └─► records / Notifier
//!                            ▼
//!                        result list ─► Consolidator ─► CheckpointStore
//!                                                          │
//!               BlockProducer ◄── resumes from ────────────┘
//! ```
//!
//! Every collaborator (ledger, document store, queue, checkpoint store,
//! notifier) is a trait; [`memory`] holds in-process implementations.

pub mod checkpoint;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod ledger;
pub mod memory;
pub mod notify;
pub mod operation;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod retry;
pub mod routing;
pub mod schema;
pub mod store;
pub mod types;
pub mod upsert;
pub mod worker;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, DocumentCheckpointStore};
pub use config::ScraperConfig;
pub use consolidator::Consolidator;
pub use error::{Result, ScraperError};
pub use filter::OperationFilter;
pub use inspector::{Inspector, StatusReport};
pub use ledger::{history, Ledger, Post};
pub use notify::{EventKind, EventPayload, NotificationEvent, Notifier, NullNotifier};
pub use operation::{Operation, OperationBody};
pub use pipeline::{Pipeline, PipelineHandle, TaskExit, TaskKind};
pub use producer::BlockProducer;
pub use queue::WorkQueue;
pub use retry::{RetryConfig, RetryPolicy};
pub use routing::{AppRoutingTable, RoutingFilter};
pub use store::{Document, DocumentStore};
pub use types::{Block, Direction, QueueNames};
pub use upsert::DocumentUpserter;
pub use worker::Worker;
