use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use crate::models::job::QueuePayload;

/// Transport queue the workers consume from. Pushes go to the tail (FIFO).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, queue: &str, payload: &QueuePayload) -> Result<(), QueueError>;

    /// Number of pending messages on `queue`.
    async fn depth(&self, queue: &str) -> Result<u64, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Redis list-backed queue (RPUSH / LLEN).
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection, timeout: Duration) -> Self {
        Self { conn, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| QueueError::Timeout(self.timeout))?
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push(&self, queue: &str, payload: &QueuePayload) -> Result<(), QueueError> {
        let message = serde_json::to_string(payload)?;
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.rpush::<_, _, ()>(queue, &message).await })
            .await
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.llen::<_, u64>(queue).await })
            .await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { redis::cmd("PING").query_async::<String>(&mut conn).await })
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue call exceeded {0:?}")]
    Timeout(Duration),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
