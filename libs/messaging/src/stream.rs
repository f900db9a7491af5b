//! Consumer-group stream backed by a Redis stream.
//!
//! Producers append immutable JSON entries; consumers in a named group pull
//! entries, each delivered to at most one active consumer at a time, and
//! acknowledge them explicitly. Ownership of pending entries is arbitrated
//! entirely by Redis group semantics, never locally.
//!
//! Acknowledged entry IDs are buffered per instance and periodically purged
//! from the stream itself (XDEL) so the store does not grow unboundedly with
//! already-processed entries.

use crate::error::{StreamError, StreamResult};
use core_config::consumer::ConsumerConfig;
use core_config::redis::RedisConfig;
use core_config::FromEnv;
use redis::aio::ConnectionManager;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How long `consume_message` blocks waiting for a new entry (milliseconds).
const BLOCK_MS: u64 = 2000;

/// Stream entry field holding the JSON payload.
const MESSAGE_FIELD: &str = "message";

/// High-water mark for locally buffered processed entry IDs. Crossing it
/// triggers a synchronous purge before `consume_message` returns.
pub const MAX_PROCESSED_IDS: usize = 10_000;

/// An entry read from a stream: the Redis-assigned ID and the decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry<T> {
    /// Redis stream entry ID (e.g., "1234567890123-0").
    pub id: String,
    /// The decoded message payload.
    pub message: T,
}

/// Entry IDs acknowledged by this instance but not yet deleted from the
/// stream. Bounded by a high-water mark; the owner flushes when `over_mark`
/// reports true and drains the rest on teardown.
#[derive(Debug)]
struct ProcessedIds {
    ids: HashSet<String>,
    max: usize,
}

impl ProcessedIds {
    fn new(max: usize) -> Self {
        Self {
            ids: HashSet::new(),
            max,
        }
    }

    fn insert(&mut self, id: String) {
        self.ids.insert(id);
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn over_mark(&self) -> bool {
        self.ids.len() > self.max
    }

    fn snapshot(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Consumer-group stream over a Redis stream.
///
/// A stream named `X` lives under the Redis key `stream:X` with consumer
/// group `X:consumer:group`. Each instance registers under a consumer
/// identity (env-overridable ordinal, see `ConsumerConfig`).
///
/// # Example
///
/// ```rust,ignore
/// use messaging::MessageStream;
///
/// let mut stream = MessageStream::new("events", "redis://127.0.0.1:6379");
/// stream.connect().await?;
/// stream.add_message(&serde_json::json!({"hello": "world"})).await?;
/// if let Some(entry) = stream.consume_message::<serde_json::Value>().await? {
///     println!("{} -> {}", entry.id, entry.message);
/// }
/// stream.disconnect().await?;
/// ```
pub struct MessageStream {
    name: String,
    stream_key: String,
    group: String,
    consumer: String,
    uri: String,
    conn: Option<ConnectionManager>,
    processed: ProcessedIds,
}

impl MessageStream {
    /// Create an unconnected stream handle.
    ///
    /// The consumer identity defaults to this process's ordinal
    /// (`ConsumerConfig`); override it with `with_consumer`.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        let name = name.into();
        let stream_key = format!("stream:{}", name);
        let group = format!("{}:consumer:group", name);
        let consumer = ConsumerConfig::from_env()
            .map(|c| c.consumer_name())
            .unwrap_or_else(|_| ConsumerConfig::new("0").consumer_name());

        Self {
            name,
            stream_key,
            group,
            consumer,
            uri: uri.into(),
            conn: None,
            processed: ProcessedIds::new(MAX_PROCESSED_IDS),
        }
    }

    /// Create an unconnected stream handle from a `RedisConfig`.
    pub fn from_config(name: impl Into<String>, config: &RedisConfig) -> Self {
        Self::new(name, config.uri.clone())
    }

    /// Set the consumer identity this instance registers under.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Set the processed-ID high-water mark.
    pub fn with_max_processed_ids(mut self, max: usize) -> Self {
        self.processed = ProcessedIds::new(max);
        self
    }

    /// Get the stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the Redis key backing this stream.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Get the consumer group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Get the consumer identity.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Whether `connect` has been called (and `disconnect` has not).
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of acknowledged entry IDs currently awaiting purge.
    pub fn processed_buffer_len(&self) -> usize {
        self.processed.len()
    }

    /// Establish the connection and create the consumer group.
    ///
    /// The group starts at the current tail of the stream, creating the
    /// stream if it does not exist. A group that already exists is success;
    /// the existing cursor is left untouched.
    pub async fn connect(&mut self) -> StreamResult<()> {
        let client = redis::Client::open(self.uri.as_str()).map_err(|e| {
            warn!(stream = %self.name, error = %e, "Failed to open Redis client");
            StreamError::Connect {
                stream: self.name.clone(),
                source: e,
            }
        })?;

        let mut conn = ConnectionManager::new(client).await.map_err(|e| {
            warn!(stream = %self.name, error = %e, "Failed to connect to Redis");
            StreamError::Connect {
                stream: self.name.clone(),
                source: e,
            }
        })?;

        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("$") // Start from the current tail
            .arg("MKSTREAM") // Create stream if it doesn't exist
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => {
                info!(
                    stream = %self.name,
                    group = %self.group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.name,
                    group = %self.group,
                    "Consumer group already exists"
                );
            }
            Err(e) => {
                warn!(stream = %self.name, error = %e, "Failed to create consumer group");
                return Err(StreamError::Connect {
                    stream: self.name.clone(),
                    source: e,
                });
            }
        }

        self.conn = Some(conn);
        info!(stream = %self.name, consumer = %self.consumer, "Stream connected");
        Ok(())
    }

    /// Flush remaining processed IDs best-effort, then tear down the
    /// connection. A flush failure is logged and swallowed; the IDs stay
    /// acknowledged either way and only their hard deletion is skipped.
    pub async fn disconnect(&mut self) -> StreamResult<()> {
        if self.conn.is_none() {
            return Err(StreamError::Disconnect {
                stream: self.name.clone(),
                reason: "not connected".to_string(),
            });
        }

        if let Err(e) = self.delete_processed_messages().await {
            warn!(
                stream = %self.name,
                error = %e,
                "Failed to flush processed entries during disconnect"
            );
        }

        self.conn = None;
        info!(stream = %self.name, "Stream disconnected");
        Ok(())
    }

    /// Append an entry, returning the Redis-assigned entry ID.
    pub async fn add_message<T: Serialize>(&self, value: &T) -> StreamResult<String> {
        let mut conn = self.connection()?;

        let payload = serde_json::to_string(value).map_err(|e| StreamError::Write {
            stream: self.name.clone(),
            reason: e.to_string(),
        })?;

        let id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(MESSAGE_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(stream = %self.name, error = %e, "Failed to add message");
                StreamError::Write {
                    stream: self.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        debug!(stream = %self.name, id = %id, "Added message");
        Ok(id)
    }

    /// Append multiple entries in one pipeline, returning their IDs in order.
    pub async fn add_messages<T: Serialize>(&self, values: &[T]) -> StreamResult<Vec<String>> {
        if values.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();

        for value in values {
            let payload = serde_json::to_string(value).map_err(|e| StreamError::Write {
                stream: self.name.clone(),
                reason: e.to_string(),
            })?;
            pipe.cmd("XADD")
                .arg(&self.stream_key)
                .arg("*")
                .arg(MESSAGE_FIELD)
                .arg(payload);
        }

        let ids: Vec<String> = pipe.query_async(&mut conn).await.map_err(|e| {
            warn!(stream = %self.name, error = %e, "Failed to add message batch");
            StreamError::Write {
                stream: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(stream = %self.name, count = ids.len(), "Added message batch");
        Ok(ids)
    }

    /// Claim at most one entry left pending by any consumer in the group,
    /// transferring ownership to this consumer.
    ///
    /// A minimum idle time of zero is used on purpose: anything pending is
    /// claimable immediately, regardless of how recently it was delivered.
    /// Returns `Ok(None)` when nothing is pending. Transport failures
    /// propagate the underlying `redis::RedisError` unmodified.
    pub async fn get_failed_message<T: DeserializeOwned>(
        &self,
    ) -> StreamResult<Option<StreamEntry<T>>> {
        let mut conn = self.connection()?;

        let reply: Option<StreamAutoClaimReply> = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(0) // min-idle-time: claim anything pending
            .arg("0") // scan from the beginning of the PEL
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        let Some(entry) = reply.claimed.into_iter().next() else {
            return Ok(None);
        };

        debug!(stream = %self.name, id = %entry.id, "Claimed pending entry");
        self.decode_entry(entry).map(Some)
    }

    /// The combined read path: reclaim a pending entry if one exists,
    /// otherwise block up to two seconds for one new entry. Whatever is
    /// obtained is acknowledged immediately and its ID recorded for a later
    /// purge; crossing the high-water mark purges synchronously before
    /// returning.
    ///
    /// Returns `Ok(None)` when neither path yielded an entry within the
    /// blocking window.
    pub async fn consume_message<T: DeserializeOwned>(
        &mut self,
    ) -> StreamResult<Option<StreamEntry<T>>> {
        let entry = match self.get_failed_message().await? {
            Some(entry) => Some(entry),
            None => self.read_new().await?,
        };

        let Some(entry) = entry else {
            return Ok(None);
        };

        self.ack(&entry.id).await?;
        self.processed.insert(entry.id.clone());

        if self.processed.over_mark() {
            info!(
                stream = %self.name,
                buffered = self.processed.len(),
                "Processed-ID buffer over high-water mark, purging"
            );
            self.delete_processed_messages().await?;
        }

        Ok(Some(entry))
    }

    /// Hard-delete every buffered processed entry ID from the stream and
    /// clear the buffer. No-op when the buffer is empty. On failure the
    /// buffer is left unchanged so a retry covers the same IDs.
    pub async fn delete_processed_messages(&mut self) -> StreamResult<()> {
        if self.processed.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        let ids = self.processed.snapshot();

        let deleted: i64 = conn.xdel(&self.stream_key, &ids).await.map_err(|e| {
            warn!(
                stream = %self.name,
                count = ids.len(),
                error = %e,
                "Failed to purge processed entries"
            );
            StreamError::Purge {
                stream: self.name.clone(),
                count: ids.len(),
                source: e,
            }
        })?;

        self.processed.clear();
        debug!(
            stream = %self.name,
            requested = ids.len(),
            deleted = deleted,
            "Purged processed entries"
        );
        Ok(())
    }

    /// Total entry count in the stream (not group-scoped).
    pub async fn length(&self) -> StreamResult<usize> {
        let mut conn = self.connection()?;

        let len: usize = conn.xlen(&self.stream_key).await.map_err(|e| {
            warn!(stream = %self.name, error = %e, "Failed to query stream length");
            StreamError::Query {
                stream: self.name.clone(),
                source: e,
            }
        })?;

        Ok(len)
    }

    /// Number of entries pending (delivered, unacknowledged) across the
    /// whole consumer group.
    pub async fn pending_count(&self) -> StreamResult<usize> {
        let mut conn = self.connection()?;

        let summary: (i64, Option<String>, Option<String>, Option<Vec<(String, i64)>>) =
            redis::cmd("XPENDING")
                .arg(&self.stream_key)
                .arg(&self.group)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    warn!(stream = %self.name, error = %e, "Failed to query pending summary");
                    StreamError::Query {
                        stream: self.name.clone(),
                        source: e,
                    }
                })?;

        Ok(summary.0.max(0) as usize)
    }

    /// Block up to `BLOCK_MS` for one entry never delivered to any consumer
    /// in this group. A nil reply or blocking timeout is a local condition,
    /// not an error.
    async fn read_new<T: DeserializeOwned>(&self) -> StreamResult<Option<StreamEntry<T>>> {
        let mut conn = self.connection()?;

        // Use Option because BLOCK returns nil when the timeout expires
        let reply: Option<StreamReadReply> = match redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">") // Only entries never delivered to this group
            .query_async(&mut conn)
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => {
                debug!(stream = %self.name, "No new entry within blocking window");
                return Ok(None);
            }
            Err(e) => return Err(StreamError::Redis(e)),
        };

        let Some(reply) = reply else {
            debug!(stream = %self.name, "No new entry within blocking window");
            return Ok(None);
        };

        let Some(entry) = reply.keys.into_iter().flat_map(|key| key.ids).next() else {
            return Ok(None);
        };

        debug!(stream = %self.name, id = %entry.id, "Read new entry");
        self.decode_entry(entry).map(Some)
    }

    /// Acknowledge an entry, removing it from the group's pending list.
    async fn ack(&self, id: &str) -> StreamResult<()> {
        let mut conn = self.connection()?;

        let _: i64 = conn.xack(&self.stream_key, &self.group, &[id]).await?;

        debug!(stream = %self.name, id = %id, "Acknowledged entry");
        Ok(())
    }

    fn decode_entry<T: DeserializeOwned>(&self, entry: StreamId) -> StreamResult<StreamEntry<T>> {
        let id = entry.id.clone();

        let Some(redis::Value::BulkString(bytes)) = entry.map.get(MESSAGE_FIELD) else {
            return Err(StreamError::Malformed {
                stream: self.name.clone(),
                id,
                reason: format!("missing '{}' field", MESSAGE_FIELD),
            });
        };

        let text = String::from_utf8_lossy(bytes);
        match serde_json::from_str(&text) {
            Ok(message) => Ok(StreamEntry { id, message }),
            Err(e) => Err(StreamError::Malformed {
                stream: self.name.clone(),
                id,
                reason: e.to_string(),
            }),
        }
    }

    fn connection(&self) -> StreamResult<ConnectionManager> {
        self.conn
            .clone()
            .ok_or_else(|| StreamError::NotConnected(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_naming() {
        let stream = MessageStream::new("events", "redis://127.0.0.1:6379");
        assert_eq!(stream.name(), "events");
        assert_eq!(stream.stream_key(), "stream:events");
        assert_eq!(stream.group(), "events:consumer:group");
        assert!(!stream.is_connected());
    }

    #[test]
    fn test_stream_builders() {
        let stream = MessageStream::new("events", "redis://127.0.0.1:6379")
            .with_consumer("consumer:9")
            .with_max_processed_ids(5);

        assert_eq!(stream.consumer(), "consumer:9");
        assert_eq!(stream.processed_buffer_len(), 0);
    }

    #[test]
    fn test_processed_ids_over_mark() {
        let mut processed = ProcessedIds::new(2);
        assert!(processed.is_empty());

        processed.insert("1-0".to_string());
        processed.insert("2-0".to_string());
        assert_eq!(processed.len(), 2);
        assert!(!processed.over_mark());

        processed.insert("3-0".to_string());
        assert!(processed.over_mark());
    }

    #[test]
    fn test_processed_ids_dedupes() {
        let mut processed = ProcessedIds::new(10);
        processed.insert("1-0".to_string());
        processed.insert("1-0".to_string());
        assert_eq!(processed.len(), 1);
    }

    #[test]
    fn test_processed_ids_snapshot_and_clear() {
        let mut processed = ProcessedIds::new(10);
        processed.insert("1-0".to_string());
        processed.insert("2-0".to_string());

        let snapshot = processed.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(processed.len(), 2); // snapshot leaves the buffer intact

        processed.clear();
        assert!(processed.is_empty());
    }

    #[tokio::test]
    async fn test_unconnected_operations_fail() {
        let mut stream = MessageStream::new("events", "redis://127.0.0.1:6379");

        let err = stream.add_message(&serde_json::json!(1)).await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected(_)));

        let err = stream
            .consume_message::<serde_json::Value>()
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::NotConnected(_)));

        let err = stream.length().await.unwrap_err();
        assert!(matches!(err, StreamError::NotConnected(_)));

        let err = stream.disconnect().await.unwrap_err();
        assert!(matches!(err, StreamError::Disconnect { .. }));
    }

    #[tokio::test]
    async fn test_purge_with_empty_buffer_needs_no_connection() {
        // Empty buffer short-circuits before touching the connection
        let mut stream = MessageStream::new("events", "redis://127.0.0.1:6379");
        assert!(stream.delete_processed_messages().await.is_ok());
    }
}
