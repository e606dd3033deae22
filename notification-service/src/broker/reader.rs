//! Consumer-group Kafka reader.
//!
//! Offsets are committed explicitly, one message at a time, after the
//! caller has handled the message. Nothing is committed automatically.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use super::error::BrokerError;

/// A message taken from a topic, detached from the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Fetches messages from a topic and commits them once handled.
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// Wait for the next message.
    ///
    /// Dropping the returned future before it completes must not lose a
    /// message; consumers race it against timers.
    async fn fetch_message(&self) -> Result<FetchedMessage, BrokerError>;

    /// Mark `msg` (and everything before it on its partition) as consumed.
    async fn commit_message(&self, msg: &FetchedMessage) -> Result<(), BrokerError>;
}

/// Kafka reader bound to one topic and consumer group.
pub struct Reader {
    topic: String,
    group: String,
    consumer: StreamConsumer,
}

impl Reader {
    pub(crate) fn new(topic: String, group: String, endpoints: &[String]) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = client_config(endpoints, &group).create()?;
        consumer.subscribe(&[topic.as_str()])?;

        info!(topic = %topic, group = %group, "kafka_reader_subscribed");

        Ok(Self {
            topic,
            group,
            consumer,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Leave the consumer group.
    pub fn close(&self) {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, group = %self.group, "kafka_reader_closed");
    }
}

fn client_config(endpoints: &[String], group: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", endpoints.join(","))
        .set("group.id", group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    config
}

#[async_trait]
impl MessageReader for Reader {
    async fn fetch_message(&self) -> Result<FetchedMessage, BrokerError> {
        let msg = self.consumer.recv().await?;

        Ok(FetchedMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit_message(&self, msg: &FetchedMessage) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;

        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "kafka_offset_committed"
        );

        Ok(())
    }
}
