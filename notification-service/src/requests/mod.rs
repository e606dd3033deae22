//! Fan-out of notification requests into per-recipient send tasks.
//!
//! ```text
//! notification.requests ──Reader──▶ NotificationRequestsConsumer
//!                                         │ buffer, flush by size or interval
//!                                         ▼
//!                      NotificationRequestsService ──Publisher──▶ notification.tasks
//! ```

pub mod consumer;
pub mod service;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use consumer::{ConsumerSettings, NotificationRequestsConsumer};
pub use service::{NotificationRequestsService, RequestsError};

/// A recipient as carried in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimContact {
    #[serde(default)]
    pub name: String,
    pub phone: String,
}

/// A request to send one template to a list of contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "userID")]
    pub user_id: i64,
    pub template: String,
    #[serde(default)]
    pub contacts: Vec<SlimContact>,
}

impl NotificationRequest {
    /// One fresh task per contact, in contact order.
    pub fn into_tasks(self) -> Vec<SendNotificationTask> {
        let template = self.template;
        self.contacts
            .into_iter()
            .map(|contact| SendNotificationTask {
                id: Uuid::new_v4(),
                text: template.clone(),
                recipient_phone: contact.phone,
                attempts: 0,
            })
            .collect()
    }
}

/// Unit of work for the sender: one SMS to one phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationTask {
    pub id: Uuid,
    pub text: String,
    pub recipient_phone: String,
    pub attempts: u32,
}
