//! Delivery-status callback processing.
//!
//! Turns a provider status callback into a [`StatusEvent`] and publishes it
//! for the services that own notification state. A failed delivery is put
//! back to `pending` while the notification still has send attempts left.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{BrokerError, Message, MessageWriter};

/// Notification state after a provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Pending,
    Failed,
}

impl NotificationStatus {
    /// Map a provider `MessageStatus` onto the next notification state.
    ///
    /// `attempts` is how many sends were already made. When it is unknown
    /// a failure is final. Intermediate states (`queued`, `sending`, ...)
    /// map to `None`.
    pub fn from_callback(status: &str, attempts: Option<u32>, max_attempts: u32) -> Option<Self> {
        match status {
            "delivered" | "sent" => Some(NotificationStatus::Sent),
            "failed" | "undelivered" => match attempts {
                Some(attempts) if attempts < max_attempts => Some(NotificationStatus::Pending),
                _ => Some(NotificationStatus::Failed),
            },
            _ => None,
        }
    }
}

/// Event published for every terminal provider status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub notification_id: Uuid,
    pub message_sid: String,
    pub status: NotificationStatus,
    pub attempts: Option<u32>,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid notification id {id:?}: {source}")]
    InvalidNotificationId {
        id: String,
        #[source]
        source: uuid::Error,
    },
    #[error("failed to encode status event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish status event: {0}")]
    Publish(#[from] BrokerError),
}

/// Publishes status events through a topic writer.
#[derive(Clone)]
pub struct CallbackService {
    writer: Arc<dyn MessageWriter>,
    max_attempts: u32,
}

impl CallbackService {
    pub fn new(writer: Arc<dyn MessageWriter>, max_attempts: u32) -> Self {
        Self {
            writer,
            max_attempts,
        }
    }

    /// Process one callback.
    ///
    /// Returns the published event, or `None` when the status is not
    /// terminal and nothing was published.
    pub async fn process_callback(
        &self,
        notification_id: &str,
        message_sid: &str,
        status: &str,
        attempts: Option<u32>,
    ) -> Result<Option<StatusEvent>, CallbackError> {
        let id = Uuid::parse_str(notification_id).map_err(|source| {
            CallbackError::InvalidNotificationId {
                id: notification_id.to_string(),
                source,
            }
        })?;

        let Some(next) = NotificationStatus::from_callback(status, attempts, self.max_attempts)
        else {
            debug!(notification_id = %id, status = %status, "callback_status_ignored");
            return Ok(None);
        };

        let event = StatusEvent {
            notification_id: id,
            message_sid: message_sid.to_string(),
            status: next,
            attempts,
        };

        let body = serde_json::to_vec(&event)?;
        self.writer
            .write_messages(&[Message::new(id.to_string(), body)])
            .await?;

        info!(
            notification_id = %id,
            message_sid = %message_sid,
            status = ?next,
            attempts = ?attempts,
            max_attempts = self.max_attempts,
            "callback_status_published"
        );

        Ok(Some(event))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Captures written messages; optionally fails every write.
    #[derive(Default)]
    pub(crate) struct MemoryWriter {
        pub messages: Mutex<Vec<Message>>,
        pub writes: AtomicUsize,
        pub fail: bool,
    }

    impl MemoryWriter {
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageWriter for MemoryWriter {
        async fn write_messages(&self, msgs: &[Message]) -> Result<(), BrokerError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BrokerError::DeadlineExceeded);
            }
            self.messages.lock().extend_from_slice(msgs);
            Ok(())
        }
    }

    /// A writer whose writes never complete.
    pub(crate) struct StalledWriter;

    #[async_trait]
    impl MessageWriter for StalledWriter {
        async fn write_messages(&self, _msgs: &[Message]) -> Result<(), BrokerError> {
            std::future::pending::<Result<(), BrokerError>>().await
        }
    }

    const ID: &str = "2b7d8c1e-6f0a-4c3b-9d5e-1a2b3c4d5e6f";

    #[test]
    fn test_status_mapping() {
        use NotificationStatus::*;

        assert_eq!(NotificationStatus::from_callback("delivered", None, 5), Some(Sent));
        assert_eq!(NotificationStatus::from_callback("sent", Some(9), 5), Some(Sent));
        assert_eq!(NotificationStatus::from_callback("queued", Some(1), 5), None);
        assert_eq!(NotificationStatus::from_callback("Delivered", None, 5), None);
    }

    #[test]
    fn test_failure_pending_while_attempts_remain() {
        use NotificationStatus::*;

        assert_eq!(NotificationStatus::from_callback("failed", Some(0), 5), Some(Pending));
        assert_eq!(NotificationStatus::from_callback("undelivered", Some(4), 5), Some(Pending));
        assert_eq!(NotificationStatus::from_callback("failed", Some(5), 5), Some(Failed));
        assert_eq!(NotificationStatus::from_callback("undelivered", Some(7), 5), Some(Failed));
        assert_eq!(NotificationStatus::from_callback("failed", None, 5), Some(Failed));
        assert_eq!(NotificationStatus::from_callback("failed", Some(0), 0), Some(Failed));
    }

    #[tokio::test]
    async fn test_process_callback_publishes_event() {
        let writer = Arc::new(MemoryWriter::default());
        let service = CallbackService::new(writer.clone(), 5);

        let event = service
            .process_callback(ID, "SM123", "delivered", Some(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.status, NotificationStatus::Sent);

        let messages = writer.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some(ID.as_bytes()));

        let decoded: StatusEvent = serde_json::from_slice(&messages[0].value).unwrap();
        assert_eq!(decoded, event);

        let json: serde_json::Value = serde_json::from_slice(&messages[0].value).unwrap();
        assert_eq!(json["status"], "sent");
        assert_eq!(json["message_sid"], "SM123");
        assert_eq!(json["attempts"], 1);
    }

    #[tokio::test]
    async fn test_process_callback_retryable_failure_is_pending() {
        let writer = Arc::new(MemoryWriter::default());
        let service = CallbackService::new(writer.clone(), 3);

        let retry = service
            .process_callback(ID, "SM1", "undelivered", Some(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retry.status, NotificationStatus::Pending);

        let exhausted = service
            .process_callback(ID, "SM2", "undelivered", Some(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exhausted.status, NotificationStatus::Failed);

        assert_eq!(writer.messages.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_process_callback_ignores_intermediate_status() {
        let writer = Arc::new(MemoryWriter::default());
        let service = CallbackService::new(writer.clone(), 5);

        let result = service
            .process_callback(ID, "SM123", "sending", Some(1))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(writer.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_process_callback_invalid_id() {
        let writer = Arc::new(MemoryWriter::default());
        let service = CallbackService::new(writer.clone(), 5);

        let err = service
            .process_callback("not-a-uuid", "SM123", "delivered", None)
            .await
            .unwrap_err();

        assert!(matches!(err, CallbackError::InvalidNotificationId { .. }));
        assert!(writer.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_process_callback_publish_failure() {
        let writer = Arc::new(MemoryWriter {
            fail: true,
            ..Default::default()
        });
        let service = CallbackService::new(writer.clone(), 5);

        let err = service
            .process_callback(ID, "SM123", "failed", Some(5))
            .await
            .unwrap_err();

        assert!(matches!(err, CallbackError::Publish(_)));
        assert_eq!(writer.writes(), 1);
    }
}
