//! Configuration module for environment variable parsing.
//!
//! Every setting has a default, so loading never fails. Values that are
//! present but unparsable fall back to the default with a warning.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::broker::{REQUESTS_TOPIC, STATUS_TOPIC, TASKS_TOPIC};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment; the signature gate is wired in `production`
    pub app_env: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Externally visible base URL the provider calls back on
    pub status_callback_endpoint: String,

    /// Twilio auth token used as the webhook signing secret
    pub twilio_auth_token: Option<String>,

    /// Kafka broker addresses, in ping order
    pub kafka_addrs: Vec<String>,

    /// Topic notification requests are consumed from
    pub requests_topic: String,

    /// Topic per-recipient send tasks are published to
    pub tasks_topic: String,

    /// Topic receiving delivery-status events
    pub status_topic: String,

    /// Consumer group for the requests reader
    pub consumer_group: String,

    /// Deadline for the broker liveness ping
    pub kafka_ping_timeout: Duration,

    /// Producer linger for the tasks writer
    pub tasks_writer_batch_timeout: Duration,

    /// Send attempts before a failed notification is given up on
    pub max_attempts: u32,

    /// Buffered tasks that force a flush of the requests consumer
    pub consumer_batch_size: usize,

    /// Interval between time-based flushes of the requests consumer
    pub consumer_flush_interval: Duration,

    /// Largest batch handed to the tasks writer in one call
    pub tasks_writer_batch_size: usize,

    /// Upper bound on processing a single callback or flush
    pub context_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),

            port: parse_or("PORT", 8081),

            status_callback_endpoint: env::var("STATUS_CALLBACK_ENDPOINT")
                .unwrap_or_else(|_| "https://localhost".to_string()),

            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").ok(),

            kafka_addrs: parse_csv("KAFKA_ADDRS")
                .filter(|addrs| !addrs.is_empty())
                .unwrap_or_else(|| vec!["kafka:9092".to_string()]),

            requests_topic: env::var("KAFKA_TOPIC_NOTIFICATION_REQUESTS")
                .unwrap_or_else(|_| REQUESTS_TOPIC.to_string()),

            tasks_topic: env::var("KAFKA_TOPIC_NOTIFICATION_TASKS")
                .unwrap_or_else(|_| TASKS_TOPIC.to_string()),

            status_topic: env::var("KAFKA_TOPIC_NOTIFICATION_STATUS")
                .unwrap_or_else(|_| STATUS_TOPIC.to_string()),

            consumer_group: env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "notification-requests-group".to_string()),

            kafka_ping_timeout: Duration::from_millis(parse_or("KAFKA_PING_TIMEOUT_MS", 3000)),

            tasks_writer_batch_timeout: Duration::from_millis(parse_or(
                "KAFKA_NOTIFICATION_TASKS_WRITER_BATCH_TIMEOUT_MS",
                1,
            )),

            max_attempts: parse_or("MAX_NOTIFICATION_ATTEMPTS", 5),

            consumer_batch_size: parse_or("NOTIFICATION_CONSUMER_BATCH_SIZE", 200_000usize).max(1),

            consumer_flush_interval: Duration::from_millis(
                parse_or("NOTIFICATION_CONSUMER_FLUSH_INTERVAL_MS", 5000u64).max(1),
            ),

            tasks_writer_batch_size: parse_or("NOTIFICATION_TASKS_WRITER_BATCH_SIZE", 10_000usize)
                .max(1),

            context_timeout: Duration::from_millis(parse_or("CONTEXT_TIMEOUT_MS", 2000)),
        }
    }

    /// Whether this is a production deployment.
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// The webhook signing secret, if one is configured and non-blank.
    pub fn validator_secret(&self) -> Option<&str> {
        self.twilio_auth_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }
}

/// Parse a variable, warning and returning `default` if it is invalid.
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    parse_opt(name).unwrap_or(default)
}

fn parse_opt<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
