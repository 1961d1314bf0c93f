//! Bus failures. Every variant names the queue or topic involved so a read
//! loop error can be traced back to the transport.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("{operation} on queue {queue} failed: {message}")]
    QueueOperation {
        queue: String,
        operation: String,
        message: String,
    },

    #[error("cannot encode message for topic {topic}: {message}")]
    Encoding { topic: String, message: String },
}

impl MessagingError {
    pub fn queue_operation(
        queue: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue: queue.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn encoding(topic: impl Into<String>, error: &serde_json::Error) -> Self {
        Self::Encoding {
            topic: topic.into(),
            message: error.to_string(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_failures_name_queue_and_operation() {
        let err = MessagingError::queue_operation("lcm_ns", "read", "connection reset");
        assert_eq!(
            err.to_string(),
            "read on queue lcm_ns failed: connection reset"
        );
    }
}
