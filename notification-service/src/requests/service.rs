//! Publishing send tasks to the tasks topic.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::SendNotificationTask;
use crate::broker::{BrokerError, Message, MessageWriter};

#[derive(Debug, Error)]
pub enum RequestsError {
    #[error("failed to fetch notification request: {0}")]
    Fetch(#[source] BrokerError),
    #[error("failed to commit notification request: {0}")]
    Commit(#[source] BrokerError),
    #[error("failed to encode send task: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish send tasks: {0}")]
    Publish(#[from] BrokerError),
    #[error("saving send tasks timed out after {0:?}")]
    TimedOut(Duration),
}

/// Encodes send tasks and writes them in bounded batches.
#[derive(Clone)]
pub struct NotificationRequestsService {
    writer: Arc<dyn MessageWriter>,
    batch_size: usize,
}

impl NotificationRequestsService {
    pub fn new(writer: Arc<dyn MessageWriter>, batch_size: usize) -> Self {
        Self {
            writer,
            batch_size: batch_size.max(1),
        }
    }

    /// Publish `tasks`, at most `batch_size` per write.
    ///
    /// Stops at the first failed batch; batches written before it stay
    /// written.
    pub async fn save_notifications(&self, tasks: &[SendNotificationTask]) -> Result<(), RequestsError> {
        let msgs = tasks
            .iter()
            .map(|task| serde_json::to_vec(task).map(Message::unkeyed))
            .collect::<Result<Vec<_>, _>>()?;

        for batch in msgs.chunks(self.batch_size) {
            self.writer.write_messages(batch).await?;
            debug!(count = batch.len(), "send_tasks_batch_written");
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;
    use uuid::Uuid;

    /// Records every write call; fails the first `failures` of them.
    #[derive(Default)]
    pub(crate) struct BatchWriter {
        pub batches: Mutex<Vec<(Instant, Vec<Message>)>>,
        pub failures: Mutex<usize>,
    }

    impl BatchWriter {
        pub fn failing(failures: usize) -> Self {
            Self {
                failures: Mutex::new(failures),
                ..Default::default()
            }
        }

        pub fn sizes(&self) -> Vec<usize> {
            self.batches.lock().iter().map(|(_, b)| b.len()).collect()
        }

        pub fn tasks(&self) -> Vec<SendNotificationTask> {
            self.batches
                .lock()
                .iter()
                .flat_map(|(_, b)| b.iter())
                .map(|m| serde_json::from_slice(&m.value).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl MessageWriter for BatchWriter {
        async fn write_messages(&self, msgs: &[Message]) -> Result<(), BrokerError> {
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(BrokerError::DeadlineExceeded);
                }
            }
            self.batches.lock().push((Instant::now(), msgs.to_vec()));
            Ok(())
        }
    }

    pub(crate) fn task(phone: &str) -> SendNotificationTask {
        SendNotificationTask {
            id: Uuid::new_v4(),
            text: "Hello".to_string(),
            recipient_phone: phone.to_string(),
            attempts: 0,
        }
    }

    #[tokio::test]
    async fn test_save_notifications_writes_in_batches() {
        let writer = Arc::new(BatchWriter::default());
        let service = NotificationRequestsService::new(writer.clone(), 2);
        let tasks: Vec<_> = ["1", "2", "3", "4", "5"].iter().map(|p| task(p)).collect();

        service.save_notifications(&tasks).await.unwrap();

        assert_eq!(writer.sizes(), vec![2, 2, 1]);
        assert_eq!(writer.tasks(), tasks);
        assert!(writer.batches.lock().iter().all(|(_, b)| b.iter().all(|m| m.key.is_none())));
    }

    #[tokio::test]
    async fn test_save_notifications_empty_writes_nothing() {
        let writer = Arc::new(BatchWriter::default());
        let service = NotificationRequestsService::new(writer.clone(), 10);

        service.save_notifications(&[]).await.unwrap();

        assert!(writer.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_save_notifications_stops_at_failed_batch() {
        let writer = Arc::new(BatchWriter::failing(1));
        let service = NotificationRequestsService::new(writer.clone(), 1);

        let err = service
            .save_notifications(&[task("1"), task("2")])
            .await
            .unwrap_err();

        assert!(matches!(err, RequestsError::Publish(_)));
        assert!(writer.batches.lock().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let service = NotificationRequestsService::new(Arc::new(BatchWriter::default()), 0);
        assert_eq!(service.batch_size, 1);
    }
}
