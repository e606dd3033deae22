//! Consumer turning notification requests into buffered send tasks.
//!
//! Tasks are buffered in memory and flushed through the service when the
//! buffer reaches the batch size, on every flush interval, and once more
//! on shutdown. A request is committed after its tasks are buffered, so a
//! crash can lose at most one unflushed buffer. A failed flush keeps the
//! buffer for the next attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::service::{NotificationRequestsService, RequestsError};
use super::{NotificationRequest, SendNotificationTask};
use crate::broker::MessageReader;
use crate::Config;

/// Buffering and timing settings for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Buffered tasks that trigger an immediate flush
    pub batch_size: usize,
    /// Time between interval flushes
    pub flush_interval: Duration,
    /// Upper bound on a single flush
    pub context_timeout: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.consumer_batch_size,
            flush_interval: config.consumer_flush_interval,
            context_timeout: config.context_timeout,
        }
    }
}

pub struct NotificationRequestsConsumer {
    service: NotificationRequestsService,
    reader: Arc<dyn MessageReader>,
    settings: ConsumerSettings,
}

impl NotificationRequestsConsumer {
    pub fn new(
        service: NotificationRequestsService,
        reader: Arc<dyn MessageReader>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            service,
            reader,
            settings,
        }
    }

    /// Consume until `shutdown` completes or the reader fails.
    ///
    /// On shutdown the remaining buffer is flushed and the flush result is
    /// returned.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), RequestsError> {
        let mut buffered: Vec<SendNotificationTask> = Vec::new();

        let period = self.settings.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        info!(
            batch_size = self.settings.batch_size,
            flush_interval_ms = period.as_millis() as u64,
            "requests_consumer_started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(buffered = buffered.len(), "requests_consumer_stopping");
                    return self.flush(&mut buffered).await;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.flush(&mut buffered).await {
                        warn!(
                            buffered = buffered.len(),
                            error = %e,
                            "notification_buffer_flush_on_interval_failed"
                        );
                    }
                }

                fetched = self.reader.fetch_message() => {
                    let msg = fetched.map_err(RequestsError::Fetch)?;

                    match serde_json::from_slice::<NotificationRequest>(&msg.payload) {
                        Ok(request) => {
                            let user_id = request.user_id;
                            let tasks = request.into_tasks();
                            info!(
                                user_id = user_id,
                                tasks = tasks.len(),
                                offset = msg.offset,
                                "notification_request_received"
                            );
                            buffered.extend(tasks);
                        }
                        Err(e) => {
                            error!(
                                raw_notification = %String::from_utf8_lossy(&msg.payload),
                                error = %e,
                                "notification_request_invalid"
                            );
                        }
                    }

                    if buffered.len() >= self.settings.batch_size {
                        if let Err(e) = self.flush(&mut buffered).await {
                            warn!(
                                buffered = buffered.len(),
                                error = %e,
                                "notification_buffer_flush_on_batch_size_failed"
                            );
                        }
                    }

                    self.reader
                        .commit_message(&msg)
                        .await
                        .map_err(RequestsError::Commit)?;
                }
            }
        }
    }

    async fn flush(&self, buffered: &mut Vec<SendNotificationTask>) -> Result<(), RequestsError> {
        if buffered.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let timeout = self.settings.context_timeout;

        tokio::time::timeout(timeout, self.service.save_notifications(buffered))
            .await
            .map_err(|_| RequestsError::TimedOut(timeout))??;

        info!(
            count = buffered.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "notification_batch_saved"
        );
        buffered.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::broker::{BrokerError, FetchedMessage};
    use crate::callback::tests::StalledWriter;
    use crate::requests::service::tests::BatchWriter;

    /// Serves scripted fetch results, then waits forever.
    #[derive(Default)]
    struct ScriptedReader {
        queue: Mutex<VecDeque<Result<FetchedMessage, BrokerError>>>,
        commits: Mutex<Vec<i64>>,
    }

    impl ScriptedReader {
        fn with(payloads: &[&str]) -> Arc<Self> {
            let queue = payloads
                .iter()
                .enumerate()
                .map(|(offset, payload)| {
                    Ok(FetchedMessage {
                        topic: "notification.requests".to_string(),
                        partition: 0,
                        offset: offset as i64,
                        payload: payload.as_bytes().to_vec(),
                    })
                })
                .collect();
            Arc::new(Self {
                queue: Mutex::new(queue),
                commits: Mutex::new(Vec::new()),
            })
        }

        fn commits(&self) -> Vec<i64> {
            self.commits.lock().clone()
        }
    }

    #[async_trait]
    impl MessageReader for ScriptedReader {
        async fn fetch_message(&self) -> Result<FetchedMessage, BrokerError> {
            let next = self.queue.lock().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending::<Result<FetchedMessage, BrokerError>>().await,
            }
        }

        async fn commit_message(&self, msg: &FetchedMessage) -> Result<(), BrokerError> {
            self.commits.lock().push(msg.offset);
            Ok(())
        }
    }

    fn request(phones: &[&str]) -> String {
        let contacts: Vec<_> = phones
            .iter()
            .map(|p| serde_json::json!({"name": "x", "phone": p}))
            .collect();
        serde_json::json!({"userID": 1, "template": "Hello", "contacts": contacts}).to_string()
    }

    fn settings(batch_size: usize, flush_interval: Duration) -> ConsumerSettings {
        ConsumerSettings {
            batch_size,
            flush_interval,
            context_timeout: Duration::from_secs(2),
        }
    }

    fn consumer(
        writer: Arc<dyn crate::broker::MessageWriter>,
        reader: Arc<ScriptedReader>,
        settings: ConsumerSettings,
    ) -> NotificationRequestsConsumer {
        NotificationRequestsConsumer::new(
            NotificationRequestsService::new(writer, 10_000),
            reader,
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_when_batch_size_reached() {
        let writer = Arc::new(BatchWriter::default());
        let first = request(&["123", "456"]);
        let second = request(&["789", "000"]);
        let reader = ScriptedReader::with(&[first.as_str(), second.as_str()]);
        let c = consumer(
            writer.clone(),
            reader.clone(),
            settings(4, Duration::from_secs(3600)),
        );

        c.run(tokio::time::sleep(Duration::from_secs(1))).await.unwrap();

        assert_eq!(writer.sizes(), vec![4]);
        let phones: Vec<_> = writer.tasks().into_iter().map(|t| t.recipient_phone).collect();
        assert_eq!(phones, vec!["123", "456", "789", "000"]);
        assert_eq!(reader.commits(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let writer = Arc::new(BatchWriter::default());
        let payload = request(&["123", "456", "789"]);
        let reader = ScriptedReader::with(&[payload.as_str()]);
        let c = consumer(writer.clone(), reader.clone(), settings(100, Duration::from_secs(5)));

        let start = Instant::now();
        c.run(tokio::time::sleep(Duration::from_secs(60))).await.unwrap();

        let batches = writer.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 3);
        assert!(batches[0].0 - start < Duration::from_secs(6));
        assert_eq!(reader.commits(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_remaining_buffer() {
        let writer = Arc::new(BatchWriter::default());
        let payload = request(&["123"]);
        let reader = ScriptedReader::with(&[payload.as_str()]);
        let c = consumer(writer.clone(), reader, settings(100, Duration::from_secs(3600)));

        c.run(tokio::time::sleep(Duration::from_secs(1))).await.unwrap();

        assert_eq!(writer.sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_is_committed_and_skipped() {
        let writer = Arc::new(BatchWriter::default());
        let payload = request(&["123"]);
        let reader = ScriptedReader::with(&["not json", payload.as_str()]);
        let c = consumer(writer.clone(), reader.clone(), settings(1, Duration::from_secs(3600)));

        c.run(tokio::time::sleep(Duration::from_secs(1))).await.unwrap();

        assert_eq!(writer.sizes(), vec![1]);
        assert_eq!(reader.commits(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_buffer_for_next_interval() {
        let writer = Arc::new(BatchWriter::failing(1));
        let payload = request(&["123", "456"]);
        let reader = ScriptedReader::with(&[payload.as_str()]);
        let c = consumer(writer.clone(), reader.clone(), settings(2, Duration::from_secs(5)));

        c.run(tokio::time::sleep(Duration::from_secs(60))).await.unwrap();

        assert_eq!(writer.sizes(), vec![2]);
        assert_eq!(reader.commits(), vec![0]);
    }

    #[tokio::test]
    async fn test_fetch_error_stops_consumer() {
        let writer = Arc::new(BatchWriter::default());
        let reader = Arc::new(ScriptedReader::default());
        reader
            .queue
            .lock()
            .push_back(Err(BrokerError::DeadlineExceeded));
        let c = consumer(writer, reader, settings(100, Duration::from_secs(3600)));

        let err = c.run(std::future::pending::<()>()).await.unwrap_err();

        assert!(matches!(err, RequestsError::Fetch(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_is_bounded_by_context_timeout() {
        let payload = request(&["123"]);
        let reader = ScriptedReader::with(&[payload.as_str()]);
        let c = NotificationRequestsConsumer::new(
            NotificationRequestsService::new(Arc::new(StalledWriter), 10),
            reader,
            ConsumerSettings {
                batch_size: 100,
                flush_interval: Duration::from_secs(3600),
                context_timeout: Duration::from_millis(10),
            },
        );

        let err = c
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, RequestsError::TimedOut(_)));
    }
}
