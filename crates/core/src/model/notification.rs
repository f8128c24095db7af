use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Health of the notification delivery path.
///
/// `Connected` means the push channel is live; `Polling` means push is
/// unavailable and the interval poller is active. The two never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Polling,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Polling => "polling",
        })
    }
}

/// Notification categories the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    EnrollmentApproved,
    EnrollmentRejected,
    CourseAssigned,
    LessonAssigned,
    QuizGraded,
    Announcement,
    #[serde(other)]
    Other,
}

/// Body of a `notification` push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default = "other_category")]
    pub category: NotificationCategory,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn other_category() -> NotificationCategory {
    NotificationCategory::Other
}

/// A message received on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Notification(Option<NotificationPayload>),
    EnrollmentUpdate(Option<Value>),
    Ping,
    /// Any other `type`; ignored by consumers.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawPushMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

impl PushMessage {
    /// Parse a push frame of the form `{ "type": ..., "data"?: ..., "payload"?: ... }`.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the frame is not a JSON object with a `type`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPushMessage = serde_json::from_str(text)?;
        let body = raw.data.or(raw.payload);
        Ok(match raw.kind.as_str() {
            "notification" => Self::Notification(
                body.and_then(|value| serde_json::from_value(value).ok()),
            ),
            "enrollment_update" => Self::EnrollmentUpdate(body),
            "ping" => Self::Ping,
            _ => Self::Unknown(raw.kind),
        })
    }
}

/// A message sent by the client on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Ping,
    Pong,
}

impl OutboundMessage {
    #[must_use]
    pub fn to_json(self) -> String {
        match self {
            OutboundMessage::Ping => r#"{"type":"ping"}"#.to_owned(),
            OutboundMessage::Pong => r#"{"type":"pong"}"#.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastTone {
    Success,
    Error,
    Info,
}

/// A user-facing transient message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub tone: ToastTone,
    pub icon: &'static str,
    pub title: String,
    pub message: Option<String>,
}

impl Toast {
    /// Summary toast for `delta` notifications discovered by polling.
    #[must_use]
    pub fn new_notifications(delta: u64) -> Self {
        let title = if delta == 1 {
            "1 new notification".to_owned()
        } else {
            format!("{delta} new notifications")
        };
        Self {
            tone: ToastTone::Info,
            icon: "bell",
            message: Some(format!("You have {title}")),
            title,
        }
    }

    /// Toast for a notification delivered over the push channel.
    #[must_use]
    pub fn for_notification(payload: &NotificationPayload) -> Self {
        let (tone, icon, fallback) = match payload.category {
            NotificationCategory::EnrollmentApproved => {
                (ToastTone::Success, "check-circle", "Enrollment approved")
            }
            NotificationCategory::EnrollmentRejected => {
                (ToastTone::Error, "x-circle", "Enrollment rejected")
            }
            NotificationCategory::CourseAssigned => {
                (ToastTone::Info, "book-open", "New course assigned")
            }
            NotificationCategory::LessonAssigned => {
                (ToastTone::Info, "book-open", "New lesson assigned")
            }
            NotificationCategory::QuizGraded => (ToastTone::Success, "award", "Quiz graded"),
            NotificationCategory::Announcement => (ToastTone::Info, "megaphone", "Announcement"),
            NotificationCategory::Other => (ToastTone::Info, "bell", "New notification"),
        };
        Self {
            tone,
            icon,
            title: payload
                .title
                .clone()
                .unwrap_or_else(|| fallback.to_owned()),
            message: payload.message.clone(),
        }
    }
}
