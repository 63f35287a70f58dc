//! Redis list queue.
//!
//! Each named list is a Redis list: `LPUSH` to push, `LPOP` to pop (so pops
//! are LIFO), `LRANGE 0 -1` for snapshots and `LREM 0` to drop consumed
//! result entries.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use tracing::info;

use chainscraper_core::error::{Result, ScraperError};
use chainscraper_core::queue::WorkQueue;

/// Redis-backed [`WorkQueue`]. Cloning shares the multiplexed connection.
#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ScraperError::Config(format!("invalid redis url {url}: {e}")))?;
        let conn = client.get_multiplexed_tokio_connection().await.map_err(queue_error)?;
        info!("connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, list: &str, value: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(list, value).await.map_err(queue_error)
    }

    async fn pop(&self, list: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.lpop(list, None).await.map_err(queue_error)
    }

    async fn len(&self, list: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.llen(list).await.map_err(queue_error)
    }

    async fn snapshot(&self, list: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.lrange(list, 0, -1).await.map_err(queue_error)
    }

    async fn remove(&self, list: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(list, 0, value).await.map_err(queue_error)
    }
}

fn queue_error(e: RedisError) -> ScraperError {
    ScraperError::Queue(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_redis_url_is_a_config_error() {
        let Err(err) = RedisQueue::connect("http://127.0.0.1:6379").await else {
            panic!("connected with an http url");
        };
        assert!(matches!(err, ScraperError::Config(_)));
        assert!(err.to_string().contains("invalid redis url"));
    }

    #[test]
    fn redis_errors_map_to_queue_errors() {
        let err = queue_error(RedisError::from((redis::ErrorKind::IoError, "connection reset")));
        assert!(matches!(err, ScraperError::Queue(_)));
        assert!(err.is_transient());
    }
}
