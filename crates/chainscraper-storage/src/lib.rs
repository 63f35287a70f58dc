//! chainscraper-storage: production backends for the scraping pipeline.
//!
//! Backends:
//! - [`mongo`]: MongoDB document store (posts, comments, records, checkpoint)
//! - [`redis`]: Redis lists for the work and result queues
//!
//! The in-memory backends used by tests live in `chainscraper_core::memory`.

#[cfg(feature = "mongo")]
pub mod mongo;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "mongo")]
pub use mongo::MongoDocumentStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisQueue;
