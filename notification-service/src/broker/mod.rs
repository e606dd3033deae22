//! Kafka dispatch for outbound notification events.
//!
//! This module provides:
//! - A factory that owns the broker address list and balancing policy
//! - A liveness ping over the configured brokers
//! - Topic-bound publishers and consumer-group readers handed out by the factory
//!
//! ## Architecture
//!
//! ```text
//! BrokerFactory ──new_writer(topic)──▶ Publisher ──▶ Balancer ──▶ partition
//!       │
//!       ├──new_reader(topic, group)──▶ Reader
//!       └──ping()──▶ Dialer ──▶ first reachable broker
//! ```

pub mod balancer;
pub mod error;
pub mod factory;
pub mod publisher;
pub mod reader;
pub mod types;

pub use balancer::{Balancer, LeastBytes, RoundRobin};
pub use error::BrokerError;
pub use factory::{BrokerConnection, BrokerFactory, Dialer, TcpDialer};
pub use publisher::{MessageWriter, Publisher, WriterOptions};
pub use reader::{FetchedMessage, MessageReader, Reader};
pub use types::{Message, REQUESTS_TOPIC, STATUS_TOPIC, TASKS_TOPIC};
