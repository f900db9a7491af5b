//! Error types for the queue and stream data paths.
//!
//! Every store-facing operation wraps the underlying failure in a variant
//! carrying the entity name, with two exceptions: `MessageStream` read-path
//! plumbing (claim, blocking read, ack) propagates the raw `redis::RedisError`
//! through the transparent `StreamError::Redis` variant, and the best-effort
//! flush inside `MessageStream::disconnect` swallows its own failure after
//! logging it.
//!
//! Absence of data (empty queue pop, empty stream poll, nothing pending to
//! claim) is never an error; those paths return `Ok(None)`.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur on a `MessageQueue`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Operation attempted before `connect` (or after `disconnect`).
    #[error("queue '{0}': not connected")]
    NotConnected(String),

    /// Establishing the Redis connection failed.
    #[error("queue '{queue}': connect failed: {source}")]
    Connect {
        queue: String,
        source: redis::RedisError,
    },

    /// Tearing down the connection failed.
    #[error("queue '{queue}': disconnect failed: {reason}")]
    Disconnect { queue: String, reason: String },

    /// Appending a value failed (serialization or transport).
    #[error("queue '{queue}': push failed: {reason}")]
    Write { queue: String, reason: String },

    /// Removing the head failed (transport or malformed stored JSON).
    #[error("queue '{queue}': pop failed: {reason}")]
    Read { queue: String, reason: String },

    /// Reading the element count failed.
    #[error("queue '{queue}': length query failed: {source}")]
    Query {
        queue: String,
        source: redis::RedisError,
    },
}

/// Errors that can occur on a `MessageStream`.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Operation attempted before `connect` (or after `disconnect`).
    #[error("stream '{0}': not connected")]
    NotConnected(String),

    /// Establishing the connection or creating the consumer group failed.
    /// A group that already exists is not an error.
    #[error("stream '{stream}': connect failed: {source}")]
    Connect {
        stream: String,
        source: redis::RedisError,
    },

    /// Appending an entry failed (serialization or transport).
    #[error("stream '{stream}': add failed: {reason}")]
    Write { stream: String, reason: String },

    /// Bulk-deleting processed entry IDs failed. The processed-ID buffer is
    /// left unchanged so a retry covers the same IDs.
    #[error("stream '{stream}': purge of {count} processed ids failed: {source}")]
    Purge {
        stream: String,
        count: usize,
        source: redis::RedisError,
    },

    /// Reading the stream length or pending summary failed.
    #[error("stream '{stream}': query failed: {source}")]
    Query {
        stream: String,
        source: redis::RedisError,
    },

    /// Tearing down the connection failed.
    #[error("stream '{stream}': disconnect failed: {reason}")]
    Disconnect { stream: String, reason: String },

    /// A stored entry could not be decoded (missing payload field or
    /// malformed JSON).
    #[error("stream '{stream}': malformed entry {id}: {reason}")]
    Malformed {
        stream: String,
        id: String,
        reason: String,
    },

    /// Raw Redis error, propagated unmodified by the read path.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
