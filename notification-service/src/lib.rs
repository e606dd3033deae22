//! Notification service - delivery-status intake and Kafka dispatch.
//!
//! This library provides the pieces wired together by the
//! `notification-service` binary:
//! - `web`: Twilio callback endpoint guarded by signature verification
//! - `broker`: Kafka factory with liveness ping, topic-bound publishers and readers
//! - `callback`: mapping provider statuses onto published events
//! - `requests`: fanning notification requests out into send tasks
//!
//! ## Architecture
//!
//! ```text
//! notification.requests → NotificationRequestsConsumer → Publisher → notification.tasks
//! Twilio → WebhookAuthGate → status_callback → Publisher → notification.status
//! ```

pub mod broker;
pub mod callback;
pub mod config;
pub mod requests;
pub mod web;

// Re-export commonly used types
pub use broker::{BrokerError, BrokerFactory, Message, MessageWriter, Publisher};
pub use callback::{CallbackService, NotificationStatus, StatusEvent};
pub use config::Config;
pub use requests::{NotificationRequestsConsumer, NotificationRequestsService};
pub use web::{router, AppState, WebhookAuthGate};
