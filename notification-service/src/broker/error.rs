//! Errors surfaced by the broker factory and its publishers.

use std::io;

use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The factory was constructed without any broker address.
    #[error("no broker endpoints configured")]
    NoEndpoints,

    /// A broker refused or failed the connection attempt.
    #[error("broker {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The shared ping deadline expired before any broker answered.
    #[error("deadline exceeded before any broker became reachable")]
    DeadlineExceeded,

    /// A connection opened but could not be closed cleanly.
    #[error("broker {addr} reachable but failed to close connection: {source}")]
    Close {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Topic metadata could not be fetched or was unusable.
    #[error("topic {topic} metadata unavailable: {reason}")]
    Metadata { topic: String, reason: String },

    /// The Kafka client rejected or failed a produce request.
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),
}

impl BrokerError {
    /// Whether this error means no broker could be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable { .. } | BrokerError::DeadlineExceeded
        )
    }
}
