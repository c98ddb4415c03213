//! Wire format of inbound notifications
//!
//! The outer envelope is a batch of records pushed by the notification
//! channel; each record carries the mail-receiving service's notification as
//! a JSON string:
//!
//! ```json
//! {"Records": [{"EventSource": "aws:sns", "Sns": {"Message": "{\"mail\": ..., \"receipt\": ...}"}}]}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "EventSource", default)]
    pub event_source: String,

    #[serde(rename = "Sns")]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// The mail-receiving service's notification body
///
/// Both sections are optional here so that their absence surfaces as a
/// validation failure rather than a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptNotification {
    #[serde(default)]
    pub notification_type: Option<String>,
    pub mail: Option<Mail>,
    pub receipt: Option<Receipt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: Vec<String>,
    #[serde(default)]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub recipients: Vec<String>,
    pub action: Option<ReceiptAction>,
    #[serde(default)]
    pub spam_verdict: Option<VerdictStatus>,
    #[serde(default)]
    pub virus_verdict: Option<VerdictStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub object_key: String,
    #[serde(default, alias = "bucketName")]
    pub container_name: String,
}

/// What the receiving service did with the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "STORAGE", alias = "S3")]
    Storage,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictStatus {
    pub status: Verdict,
}

/// Scanner verdict attached to a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    Gray,
    ProcessingFailed,
    Disabled,
}

impl NotificationBatch {
    /// Wrap a receipt notification the way the notification channel does
    ///
    /// # Errors
    ///
    /// Fails only if `message` cannot be serialised.
    pub fn wrap(
        event_source: impl Into<String>,
        message: &ReceiptNotification,
    ) -> serde_json::Result<String> {
        serde_json::to_string(&Self {
            records: vec![NotificationRecord {
                event_source: event_source.into(),
                notification: Some(Notification {
                    message: serde_json::to_string(message)?,
                }),
            }],
        })
    }
}
