//! # In-Memory Message Bus
//!
//! Per-topic FIFO queues behind a tokio mutex. Messages are removed on
//! receive, so `ack` is a no-op. Every published message is also kept in a
//! history so tests can assert on notifications.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use super::{BusMessage, MessageBus, MessagingResult};

#[derive(Debug, Default)]
struct Queues {
    topics: HashMap<String, VecDeque<BusMessage>>,
    history: Vec<BusMessage>,
    next_receipt: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryBus {
    queues: Mutex<Queues>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything ever published, oldest first
    pub async fn published(&self) -> Vec<BusMessage> {
        self.queues.lock().await.history.clone()
    }

    /// Published messages matching topic and command
    pub async fn published_matching(&self, topic: &str, command: &str) -> Vec<BusMessage> {
        self.queues
            .lock()
            .await
            .history
            .iter()
            .filter(|m| m.topic == topic && m.command == command)
            .cloned()
            .collect()
    }

    pub async fn pending(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .await
            .topics
            .get(topic)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, command: &str, params: Value) -> MessagingResult<()> {
        let mut queues = self.queues.lock().await;
        queues.next_receipt += 1;
        let mut message = BusMessage::new(topic, command, params);
        message.receipt = Some(queues.next_receipt);
        debug!(topic = %topic, command = %command, "Publishing in-memory message");
        queues.history.push(message.clone());
        queues
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn receive(&self, topics: &[&str], limit: usize) -> MessagingResult<Vec<BusMessage>> {
        let mut queues = self.queues.lock().await;
        let mut received = Vec::new();
        for topic in topics {
            if received.len() >= limit {
                break;
            }
            if let Some(queue) = queues.topics.get_mut(*topic) {
                while received.len() < limit {
                    match queue.pop_front() {
                        Some(message) => received.push(message),
                        None => break,
                    }
                }
            }
        }
        Ok(received)
    }

    async fn ack(&self, _message: &BusMessage) -> MessagingResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn receive_drains_in_order_and_respects_limit() {
        let bus = InMemoryBus::new();
        bus.publish("ns", "instantiate", json!({"n": 1})).await.unwrap();
        bus.publish("ns", "terminate", json!({"n": 2})).await.unwrap();
        bus.publish("sdn", "create", json!({})).await.unwrap();

        let first = bus.receive(&["ns", "sdn"], 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].command, "instantiate");

        let rest = bus.receive(&["ns", "sdn"], 10).await.unwrap();
        let commands: Vec<_> = rest.iter().map(|m| m.command.as_str()).collect();
        assert_eq!(commands, vec!["terminate", "create"]);
        assert_eq!(bus.pending("ns").await, 0);
        assert_eq!(bus.published().await.len(), 3);
    }
}
