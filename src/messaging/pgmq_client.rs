//! # PostgreSQL Message Queue Bus (pgmq-rs)
//!
//! One pgmq queue per topic (`lcm_<topic>`). The `admin` topic is addressed
//! per worker so every instance sees its own liveness pings: messages carrying
//! a `to` parameter land in `lcm_admin_<to>`, and each worker reads only its
//! own admin queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use pgmq::{types::Message, PGMQueue};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{BusMessage, MessageBus, MessagingError, MessagingResult};
use crate::constants::topics;

const QUEUE_PREFIX: &str = "lcm_";
const MAX_QUEUE_NAME: usize = 47;

pub struct PgmqBus {
    pgmq: PGMQueue,
    worker_id: String,
    visibility_timeout: i32,
    created: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for PgmqBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgmqBus")
            .field("worker_id", &self.worker_id)
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

impl PgmqBus {
    /// Create the bus on an existing connection pool
    pub async fn new_with_pool(
        pool: sqlx::PgPool,
        worker_id: impl Into<String>,
        visibility_timeout: i32,
    ) -> Self {
        let worker_id = worker_id.into();
        info!(worker_id = %worker_id, "Creating pgmq bus with shared connection pool");
        Self {
            pgmq: PGMQueue::new_with_pool(pool).await,
            worker_id,
            visibility_timeout,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Queue a message published on `topic` is written to
    pub fn publish_queue(&self, topic: &str, params: &Value) -> String {
        if topic == topics::ADMIN {
            if let Some(to) = params.get("to").and_then(Value::as_str) {
                return queue_name(&format!("{}_{}", topics::ADMIN, to));
            }
        }
        queue_name(topic)
    }

    /// Queue this worker reads for `topic`
    pub fn read_queue(&self, topic: &str) -> String {
        if topic == topics::ADMIN {
            return queue_name(&format!("{}_{}", topics::ADMIN, self.worker_id));
        }
        queue_name(topic)
    }

    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()> {
        if self.created.lock().contains(queue) {
            return Ok(());
        }
        debug!(queue = %queue, "Creating queue");
        self.pgmq
            .create(queue)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "create", e.to_string()))?;
        self.created.lock().insert(queue.to_string());
        Ok(())
    }
}

/// pgmq queue names are limited to alphanumerics and underscores
pub fn queue_name(topic: &str) -> String {
    let mut name: String = format!("{QUEUE_PREFIX}{topic}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    name.truncate(MAX_QUEUE_NAME);
    name
}

#[async_trait]
impl MessageBus for PgmqBus {
    async fn publish(&self, topic: &str, command: &str, params: Value) -> MessagingResult<()> {
        let queue = self.publish_queue(topic, &params);
        self.ensure_queue(&queue).await?;
        let payload = serde_json::to_value(BusMessage::new(topic, command, params))
            .map_err(|e| MessagingError::encoding(topic, &e))?;
        let msg_id = self
            .pgmq
            .send(&queue, &payload)
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "send", e.to_string()))?;
        debug!(queue = %queue, command = %command, msg_id = msg_id, "Message sent");
        Ok(())
    }

    async fn receive(&self, topics: &[&str], limit: usize) -> MessagingResult<Vec<BusMessage>> {
        let mut received = Vec::new();
        for topic in topics {
            let remaining = limit.saturating_sub(received.len());
            if remaining == 0 {
                break;
            }
            let queue = self.read_queue(topic);
            self.ensure_queue(&queue).await?;
            let batch: Vec<Message<Value>> = self
                .pgmq
                .read_batch(&queue, Some(self.visibility_timeout), remaining as i32)
                .await
                .map_err(|e| MessagingError::queue_operation(&queue, "read", e.to_string()))?
                .unwrap_or_default();

            for raw in batch {
                match serde_json::from_value::<BusMessage>(raw.message) {
                    Ok(mut message) => {
                        message.receipt = Some(raw.msg_id);
                        received.push(message);
                    }
                    Err(e) => {
                        warn!(queue = %queue, msg_id = raw.msg_id, error = %e, "Dropping undecodable message");
                        self.pgmq.delete(&queue, raw.msg_id).await.map_err(|e| {
                            MessagingError::queue_operation(&queue, "delete", e.to_string())
                        })?;
                    }
                }
            }
        }
        Ok(received)
    }

    async fn ack(&self, message: &BusMessage) -> MessagingResult<()> {
        let Some(msg_id) = message.receipt else {
            return Ok(());
        };
        let queue = self.read_queue(&message.topic);
        self.pgmq
            .delete(&queue, msg_id)
            .await
            .map_err(|e| MessagingError::queue_operation(&queue, "delete", e.to_string()))?;
        Ok(())
    }
}
