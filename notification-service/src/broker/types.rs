//! Topic names and the message type shared by publishers and balancers.

/// Default topic carrying notification requests to fan out.
pub const REQUESTS_TOPIC: &str = "notification.requests";

/// Default topic for per-recipient send tasks.
pub const TASKS_TOPIC: &str = "notification.tasks";

/// Default topic for delivery-status events.
pub const STATUS_TOPIC: &str = "notification.status";

/// A single record to be written to a topic.
///
/// The partition is not part of the message; it is chosen at publish time
/// by the publisher's [`Balancer`](super::Balancer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional record key
    pub key: Option<Vec<u8>>,
    /// Record payload
    pub value: Vec<u8>,
}

impl Message {
    /// Create a keyed message.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    /// Create a message without a key.
    pub fn unkeyed(value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    /// Number of bytes this message contributes to a partition's load.
    pub fn size(&self) -> usize {
        self.key.as_ref().map(|k| k.len()).unwrap_or(0) + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_size_counts_key_and_value() {
        assert_eq!(Message::new("id-1", "payload").size(), 11);
        assert_eq!(Message::unkeyed("payload").size(), 7);
        assert_eq!(Message::unkeyed(Vec::new()).size(), 0);
    }
}
