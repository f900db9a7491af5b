//! FIFO queue backed by a Redis list.
//!
//! Values are JSON-encoded on push and decoded on pop. The queue tracks no
//! consumers; only position matters.

use crate::error::{QueueError, QueueResult};
use core_config::redis::RedisConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// FIFO queue over a Redis list.
///
/// `push` appends to the tail, `pop` removes and returns the head. A queue
/// named `X` lives under the Redis key `queue:X`.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::MessageQueue;
///
/// let mut queue = MessageQueue::new("orders", "redis://127.0.0.1:6379");
/// queue.connect().await?;
/// queue.push(&serde_json::json!({"order": 7})).await?;
/// let head: Option<serde_json::Value> = queue.pop().await?;
/// ```
pub struct MessageQueue {
    name: String,
    key: String,
    uri: String,
    conn: Option<ConnectionManager>,
}

impl MessageQueue {
    /// Create an unconnected queue handle.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("queue:{}", name);
        Self {
            name,
            key,
            uri: uri.into(),
            conn: None,
        }
    }

    /// Create an unconnected queue handle from a `RedisConfig`.
    pub fn from_config(name: impl Into<String>, config: &RedisConfig) -> Self {
        Self::new(name, config.uri.clone())
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the Redis key backing this queue.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether `connect` has been called (and `disconnect` has not).
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Establish the Redis connection.
    pub async fn connect(&mut self) -> QueueResult<()> {
        let client = redis::Client::open(self.uri.as_str()).map_err(|e| {
            warn!(queue = %self.name, error = %e, "Failed to open Redis client");
            QueueError::Connect {
                queue: self.name.clone(),
                source: e,
            }
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            warn!(queue = %self.name, error = %e, "Failed to connect to Redis");
            QueueError::Connect {
                queue: self.name.clone(),
                source: e,
            }
        })?;

        self.conn = Some(conn);
        info!(queue = %self.name, "Queue connected");
        Ok(())
    }

    /// Tear down the Redis connection.
    pub async fn disconnect(&mut self) -> QueueResult<()> {
        match self.conn.take() {
            Some(conn) => {
                drop(conn);
                info!(queue = %self.name, "Queue disconnected");
                Ok(())
            }
            None => Err(QueueError::Disconnect {
                queue: self.name.clone(),
                reason: "not connected".to_string(),
            }),
        }
    }

    /// Append a value to the tail of the queue.
    pub async fn push<T: Serialize>(&self, value: &T) -> QueueResult<()> {
        let mut conn = self.connection()?;

        let payload = serde_json::to_string(value).map_err(|e| QueueError::Write {
            queue: self.name.clone(),
            reason: e.to_string(),
        })?;

        let _: i64 = conn.lpush(&self.key, &payload).await.map_err(|e| {
            warn!(queue = %self.name, error = %e, "Failed to push value");
            QueueError::Write {
                queue: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(queue = %self.name, "Pushed value");
        Ok(())
    }

    /// Remove and return the head of the queue.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub async fn pop<T: DeserializeOwned>(&self) -> QueueResult<Option<T>> {
        let mut conn = self.connection()?;

        let raw: Option<String> = conn.rpop(&self.key, None).await.map_err(|e| {
            warn!(queue = %self.name, error = %e, "Failed to pop value");
            QueueError::Read {
                queue: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let Some(text) = raw else {
            debug!(queue = %self.name, "Queue empty");
            return Ok(None);
        };

        let value = serde_json::from_str(&text).map_err(|e| {
            warn!(queue = %self.name, error = %e, "Popped value is not valid JSON");
            QueueError::Read {
                queue: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(queue = %self.name, "Popped value");
        Ok(Some(value))
    }

    /// Current element count.
    pub async fn size(&self) -> QueueResult<usize> {
        let mut conn = self.connection()?;

        let len: usize = conn.llen(&self.key).await.map_err(|e| {
            warn!(queue = %self.name, error = %e, "Failed to query queue length");
            QueueError::Query {
                queue: self.name.clone(),
                source: e,
            }
        })?;

        Ok(len)
    }

    fn connection(&self) -> QueueResult<ConnectionManager> {
        self.conn
            .clone()
            .ok_or_else(|| QueueError::NotConnected(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_key_naming() {
        let queue = MessageQueue::new("orders", "redis://127.0.0.1:6379");
        assert_eq!(queue.name(), "orders");
        assert_eq!(queue.key(), "queue:orders");
        assert!(!queue.is_connected());
    }

    #[test]
    fn test_queue_from_config() {
        let config = RedisConfig::new("redis://cache:6379".to_string());
        let queue = MessageQueue::from_config("emails", &config);
        assert_eq!(queue.key(), "queue:emails");
    }

    #[tokio::test]
    async fn test_unconnected_operations_fail() {
        let queue = MessageQueue::new("orders", "redis://127.0.0.1:6379");

        let err = queue.push(&serde_json::json!(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::NotConnected(_)));

        let err = queue.pop::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(err, QueueError::NotConnected(_)));

        let err = queue.size().await.unwrap_err();
        assert!(matches!(err, QueueError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_fails() {
        let mut queue = MessageQueue::new("orders", "redis://127.0.0.1:6379");
        let err = queue.disconnect().await.unwrap_err();
        assert!(matches!(err, QueueError::Disconnect { .. }));
    }
}
