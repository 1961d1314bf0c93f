//! # Message Bus
//!
//! Commands arrive and notifications leave as `(topic, command, params)`
//! triples. [`MessageBus`] is the seam between the dispatcher and a concrete
//! transport: [`InMemoryBus`] for tests and single-process use, [`PgmqBus`]
//! for queues living in PostgreSQL next to the document store.
//!
//! ```rust
//! use osm_lcm::messaging::{InMemoryBus, MessageBus};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let bus = InMemoryBus::new();
//! bus.publish("ns", "instantiate", json!({"nsInstanceId": "nsr-1", "_id": "op-1"}))
//!     .await
//!     .unwrap();
//!
//! let messages = bus.receive(&["ns", "admin"], 10).await.unwrap();
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].param_str("_id"), Some("op-1"));
//! # });
//! ```

pub mod errors;
pub mod in_memory_client;
pub mod message;
pub mod pgmq_client;

pub use errors::{MessagingError, MessagingResult};
pub use in_memory_client::InMemoryBus;
pub use message::BusMessage;
pub use pgmq_client::PgmqBus;

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait MessageBus: Send + Sync + std::fmt::Debug {
    /// Publish one message on a topic
    async fn publish(&self, topic: &str, command: &str, params: Value) -> MessagingResult<()>;

    /// Read up to `limit` pending messages across the given topics.
    /// Returns an empty vector when nothing is pending.
    async fn receive(&self, topics: &[&str], limit: usize) -> MessagingResult<Vec<BusMessage>>;

    /// Acknowledge a message returned by [`MessageBus::receive`]
    async fn ack(&self, message: &BusMessage) -> MessagingResult<()>;
}
