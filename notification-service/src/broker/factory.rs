//! Broker factory: liveness probing and topic-bound writer construction.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::balancer::{Balancer, LeastBytes};
use super::error::BrokerError;
use super::publisher::{Publisher, WriterOptions};
use super::reader::Reader;
use crate::Config;

/// Default deadline for [`BrokerFactory::ping`].
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Opens raw connections to broker addresses for the liveness ping.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    async fn connect(&self, addr: &str) -> io::Result<Box<dyn BrokerConnection>>;
}

/// A connection opened by a [`Dialer`].
#[async_trait]
pub trait BrokerConnection: Send {
    async fn close(self: Box<Self>) -> io::Result<()>;
}

/// Plain TCP dialer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

struct TcpConnection(TcpStream);

#[async_trait]
impl Dialer for TcpDialer {
    async fn connect(&self, addr: &str) -> io::Result<Box<dyn BrokerConnection>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(TcpConnection(stream)))
    }
}

#[async_trait]
impl BrokerConnection for TcpConnection {
    async fn close(self: Box<Self>) -> io::Result<()> {
        let TcpConnection(mut stream) = *self;
        stream.shutdown().await
    }
}

/// Produces topic-bound publishers sharing one endpoint set and balancer.
///
/// The factory is immutable once built and cheap to clone. It never
/// tracks the publishers it hands out; closing them is the caller's job.
#[derive(Clone)]
pub struct BrokerFactory {
    endpoints: Arc<Vec<String>>,
    balancer: Arc<dyn Balancer>,
    dialer: Arc<dyn Dialer>,
    ping_timeout: Duration,
}

impl fmt::Debug for BrokerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerFactory")
            .field("endpoints", &self.endpoints)
            .field("balancer", &self.balancer)
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

impl BrokerFactory {
    /// Create a factory over `endpoints`, pinged in the given order.
    pub fn new(endpoints: Vec<String>, balancer: Arc<dyn Balancer>) -> Result<Self, BrokerError> {
        if endpoints.is_empty() {
            return Err(BrokerError::NoEndpoints);
        }

        Ok(Self {
            endpoints: Arc::new(endpoints),
            balancer,
            dialer: Arc::new(TcpDialer),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        })
    }

    /// Build the factory from configuration, balancing by least bytes.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let factory = Self::new(config.kafka_addrs.clone(), Arc::new(LeastBytes::new()))?
            .with_ping_timeout(config.kafka_ping_timeout);

        info!(
            endpoints = ?factory.endpoints,
            ping_timeout_ms = factory.ping_timeout.as_millis() as u64,
            "kafka_factory_created"
        );

        Ok(factory)
    }

    /// Replace the dialer used by the liveness ping.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Replace the default deadline used by [`ping`](Self::ping).
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn endpoints(&self) -> &Arc<Vec<String>> {
        &self.endpoints
    }

    pub fn balancer(&self) -> &Arc<dyn Balancer> {
        &self.balancer
    }

    /// Check that at least one broker accepts connections, using the
    /// configured deadline.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        self.ping_until(Instant::now() + self.ping_timeout).await
    }

    /// Check that at least one broker accepts connections before `deadline`.
    ///
    /// Endpoints are tried one at a time in configured order and the first
    /// success ends the ping. The deadline covers the whole ping, so
    /// later endpoints get whatever budget earlier attempts left over. On
    /// failure the most recent error is returned. Closing the ping
    /// connection is bounded by the same deadline; a close that fails or
    /// outlives it is a [`BrokerError::Close`].
    pub async fn ping_until(&self, deadline: Instant) -> Result<(), BrokerError> {
        let mut last_err = BrokerError::DeadlineExceeded;

        for addr in self.endpoints.iter() {
            if Instant::now() >= deadline {
                last_err = BrokerError::DeadlineExceeded;
                break;
            }

            debug!(addr = %addr, "kafka_ping_attempt");

            let conn = match timeout_at(deadline, self.dialer.connect(addr)).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(source)) => {
                    warn!(addr = %addr, error = %source, "kafka_ping_endpoint_failed");
                    last_err = BrokerError::Unreachable {
                        addr: addr.clone(),
                        source,
                    };
                    continue;
                }
                Err(_) => {
                    last_err = BrokerError::DeadlineExceeded;
                    break;
                }
            };

            let closed = match timeout_at(deadline, conn.close()).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "close did not finish before the deadline",
                )),
            };
            closed.map_err(|source| BrokerError::Close {
                addr: addr.clone(),
                source,
            })?;

            debug!(addr = %addr, "kafka_ping_ok");
            return Ok(());
        }

        warn!(error = %last_err, "kafka_ping_failed");
        Err(last_err)
    }

    /// Create a publisher bound to `topic`.
    ///
    /// No network I/O happens here. Every call returns an independent
    /// publisher, even for the same topic.
    pub fn new_writer(&self, topic: impl Into<String>) -> Publisher {
        self.new_writer_with(topic, WriterOptions::default())
    }

    /// Create a publisher bound to `topic` with extra writer options.
    pub fn new_writer_with(&self, topic: impl Into<String>, options: WriterOptions) -> Publisher {
        Publisher::new(
            topic.into(),
            Arc::clone(&self.endpoints),
            Arc::clone(&self.balancer),
            options,
        )
    }

    /// Create a reader for `topic` in consumer group `group`.
    ///
    /// Builds the consumer and subscribes; the group join and fetching
    /// happen in the background.
    pub fn new_reader(
        &self,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Result<Reader, BrokerError> {
        Reader::new(topic.into(), group.into(), &self.endpoints)
    }
}
