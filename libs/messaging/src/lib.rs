//! Redis-backed messaging primitives
//!
//! Thin async convenience wrappers over Redis list and stream commands:
//!
//! - **`MessageQueue`**: FIFO queue over a Redis list (push/pop/size). No
//!   consumer tracking; only position matters.
//! - **`MessageStream`**: consumer-group abstraction over a Redis stream.
//!   Producers append immutable JSON entries; consumers in a named group
//!   pull entries one at a time, pending entries abandoned by other
//!   consumers are reclaimed before new ones are read, and acknowledged
//!   entry IDs are buffered locally and periodically purged from the stream.
//!
//! Durability, ordering, and delivery guarantees come entirely from Redis;
//! there is no internal retry, scheduling, or coordination layer. Callers
//! retry at a higher layer.
//!
//! ## Example
//!
//! ```ignore
//! use messaging::{MessageQueue, MessageStream};
//!
//! let mut queue = MessageQueue::new("orders", "redis://127.0.0.1:6379");
//! queue.connect().await?;
//! queue.push(&serde_json::json!({"order": 7})).await?;
//! let head: Option<serde_json::Value> = queue.pop().await?;
//!
//! let mut stream = MessageStream::new("events", "redis://127.0.0.1:6379");
//! stream.connect().await?;
//! let id = stream.add_message(&serde_json::json!({"hello": "world"})).await?;
//! let entry = stream.consume_message::<serde_json::Value>().await?;
//! stream.disconnect().await?;
//! ```

mod error;
mod queue;
mod stream;

// Re-export main types
pub use error::{QueueError, QueueResult, StreamError, StreamResult};
pub use queue::MessageQueue;
pub use stream::{MessageStream, StreamEntry, MAX_PROCESSED_IDS};
