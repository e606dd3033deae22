//! Topic-bound Kafka publisher.
//!
//! A publisher owns its own producer, created lazily on first write, and
//! chooses a partition for every message through the balancer it was
//! built with. Callers must [`close`](Publisher::close) it at shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::balancer::Balancer;
use super::error::BrokerError;
use super::types::Message;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes messages to a single topic.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn write_messages(&self, msgs: &[Message]) -> Result<(), BrokerError>;
}

/// Optional per-writer settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterOptions {
    /// How long the producer may hold messages to build a batch.
    pub batch_timeout: Option<Duration>,
}

/// Kafka publisher bound to one topic.
///
/// Clones share the same producer. Publishers created separately by the
/// factory never do.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    topic: String,
    endpoints: Arc<Vec<String>>,
    balancer: Arc<dyn Balancer>,
    options: WriterOptions,
    producer: RwLock<Option<FutureProducer>>,
    partitions: RwLock<Option<Arc<Vec<i32>>>>,
}

impl Publisher {
    pub(crate) fn new(
        topic: String,
        endpoints: Arc<Vec<String>>,
        balancer: Arc<dyn Balancer>,
        options: WriterOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                topic,
                endpoints,
                balancer,
                options,
                producer: RwLock::new(None),
                partitions: RwLock::new(None),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn endpoints(&self) -> &Arc<Vec<String>> {
        &self.inner.endpoints
    }

    pub fn balancer(&self) -> &Arc<dyn Balancer> {
        &self.inner.balancer
    }

    pub fn options(&self) -> &WriterOptions {
        &self.inner.options
    }

    /// Whether `other` shares this publisher's producer.
    pub fn same_instance(&self, other: &Publisher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.inner.endpoints.join(","))
            .set("message.timeout.ms", DELIVERY_TIMEOUT.as_millis().to_string());

        if let Some(batch_timeout) = self.inner.options.batch_timeout {
            config.set("linger.ms", batch_timeout.as_millis().to_string());
        }

        config
    }

    /// Ensure we have a producer, creating it on first use.
    async fn ensure_producer(&self) -> Result<FutureProducer, BrokerError> {
        {
            let producer = self.inner.producer.read().await;
            if let Some(p) = producer.as_ref() {
                return Ok(p.clone());
            }
        }

        let mut producer = self.inner.producer.write().await;

        // Double-check after acquiring write lock
        if let Some(p) = producer.as_ref() {
            return Ok(p.clone());
        }

        let created: FutureProducer = self.client_config().create()?;

        info!(
            topic = %self.inner.topic,
            endpoints = self.inner.endpoints.len(),
            "kafka_producer_created"
        );

        *producer = Some(created.clone());
        Ok(created)
    }

    /// Partition ids of the bound topic, fetched once and cached.
    async fn partitions(&self, producer: &FutureProducer) -> Result<Arc<Vec<i32>>, BrokerError> {
        {
            let partitions = self.inner.partitions.read().await;
            if let Some(p) = partitions.as_ref() {
                return Ok(Arc::clone(p));
            }
        }

        let mut partitions = self.inner.partitions.write().await;
        if let Some(p) = partitions.as_ref() {
            return Ok(Arc::clone(p));
        }

        let topic = self.inner.topic.clone();
        let client = producer.clone();

        // fetch_metadata blocks on librdkafka
        let fetched = tokio::task::spawn_blocking(move || {
            client
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(METADATA_TIMEOUT))
        })
        .await
        .map_err(|e| self.metadata_error(e.to_string()))??;

        let topic_metadata = fetched
            .topics()
            .iter()
            .find(|t| t.name() == self.inner.topic)
            .ok_or_else(|| self.metadata_error("topic missing from metadata".into()))?;

        if let Some(err) = topic_metadata.error() {
            return Err(self.metadata_error(format!("{err:?}")));
        }

        let ids: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();
        if ids.is_empty() {
            return Err(self.metadata_error("topic has no partitions".into()));
        }

        debug!(topic = %self.inner.topic, partitions = ids.len(), "kafka_partitions_loaded");

        let ids = Arc::new(ids);
        *partitions = Some(Arc::clone(&ids));
        Ok(ids)
    }

    fn metadata_error(&self, reason: String) -> BrokerError {
        BrokerError::Metadata {
            topic: self.inner.topic.clone(),
            reason,
        }
    }

    /// Flush pending messages and release the producer.
    ///
    /// Safe to call more than once; the next write reconnects.
    pub async fn close(&self) {
        let producer = self.inner.producer.write().await.take();
        self.inner.partitions.write().await.take();

        if let Some(producer) = producer {
            let flushed =
                tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
                    .await;

            match flushed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(topic = %self.inner.topic, error = %e, "kafka_flush_error"),
                Err(e) => warn!(topic = %self.inner.topic, error = %e, "kafka_flush_join_error"),
            }
        }

        info!(topic = %self.inner.topic, "kafka_publisher_closed");
    }
}

#[async_trait]
impl MessageWriter for Publisher {
    async fn write_messages(&self, msgs: &[Message]) -> Result<(), BrokerError> {
        if msgs.is_empty() {
            return Ok(());
        }

        let producer = self.ensure_producer().await?;
        let partitions = self.partitions(&producer).await?;
        let topic = self.inner.topic.as_str();

        let mut deliveries = Vec::with_capacity(msgs.len());
        for msg in msgs {
            let partition = self
                .inner
                .balancer
                .balance(msg, &partitions)
                .ok_or_else(|| self.metadata_error("topic has no partitions".into()))?;

            let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic)
                .payload(msg.value.as_slice())
                .partition(partition);
            if let Some(key) = msg.key.as_deref() {
                record = record.key(key);
            }

            let producer = &producer;
            deliveries.push(async move {
                producer
                    .send(record, Timeout::After(DELIVERY_TIMEOUT))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| BrokerError::Kafka(e))
            });
        }

        try_join_all(deliveries).await?;

        debug!(topic = %topic, count = msgs.len(), "kafka_messages_written");

        Ok(())
    }
}
