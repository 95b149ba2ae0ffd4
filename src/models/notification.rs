//! Payloads handed to the notification and audit collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReservationFulfillable,
    ReservationExpired,
    LoanOverdue,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReservationFulfillable => "reservation_fulfillable",
            NotificationKind::ReservationExpired => "reservation_expired",
            NotificationKind::LoanOverdue => "loan_overdue",
        }
    }
}

/// Message for the notification dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient_id: i32,
    pub item_id: i32,
    pub message: String,
    pub kind: NotificationKind,
}

/// Compliance record of a committed state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub actor_id: Option<i32>,
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: i32,
    pub details: Value,
    pub at: DateTime<Utc>,
}
