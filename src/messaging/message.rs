//! Bus envelope: the `(topic, command, params)` triple plus the receipt needed
//! to acknowledge it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
    /// Backend receipt; absent on messages not yet read from a queue
    #[serde(skip)]
    pub receipt: Option<i64>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, command: impl Into<String>, params: Value) -> Self {
        Self {
            topic: topic.into(),
            command: command.into(),
            params,
            receipt: None,
        }
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Past-tense commands are notifications from other workers, never work
    pub fn is_notification(&self) -> bool {
        self.command.ends_with("ed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_is_not_serialized() {
        let mut msg = BusMessage::new("ns", "instantiate", json!({"nsInstanceId": "n1"}));
        msg.receipt = Some(7);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("receipt").is_none());
        assert_eq!(msg.param_str("nsInstanceId"), Some("n1"));
    }

    #[test]
    fn notification_detection() {
        assert!(BusMessage::new("ns", "instantiated", json!({})).is_notification());
        assert!(!BusMessage::new("ns", "terminate", json!({})).is_notification());
    }
}
