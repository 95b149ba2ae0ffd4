//! Post-commit circulation events.
//!
//! Events are emitted only after the transaction that produced them commits.
//! A dispatcher task turns them into audit entries and notifications; its
//! failures are logged and never reach the circulation operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use crate::models::{
    AuditEntry, BorrowRecord, CatalogItem, Notification, NotificationKind, Reservation,
};

use super::{audit::AuditSink, clock::Clock, notifier::NotificationDispatcher};

/// A committed state change of the circulation subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum CirculationEvent {
    ItemCreated { item: CatalogItem, actor_id: i32 },
    CopiesAdjusted { item: CatalogItem, actor_id: i32 },
    ItemDeleted { item: CatalogItem, actor_id: i32 },
    Borrowed { record: BorrowRecord, actor_id: i32 },
    Returned { record: BorrowRecord, actor_id: i32 },
    FineSettled { record: BorrowRecord, actor_id: i32 },
    MarkedOverdue { record: BorrowRecord, title: String },
    ReservationCreated { reservation: Reservation, actor_id: i32 },
    ReservationFulfillable { reservation: Reservation, title: String },
    ReservationCancelled { reservation: Reservation, actor_id: Option<i32> },
    ReservationCompleted { reservation: Reservation },
    ReservationExpired { reservation: Reservation, title: String },
}

impl CirculationEvent {
    /// Audit record for this change
    pub fn audit_entry(&self, at: DateTime<Utc>) -> AuditEntry {
        let (actor_id, action, entity_type, entity_id, details) = match self {
            CirculationEvent::ItemCreated { item, actor_id } => (
                Some(*actor_id),
                "CREATE",
                "catalog_items",
                item.id,
                json!({ "total_copies": item.total_copies }),
            ),
            CirculationEvent::CopiesAdjusted { item, actor_id } => (
                Some(*actor_id),
                "ADJUST_COPIES",
                "catalog_items",
                item.id,
                json!({ "total_copies": item.total_copies, "available_copies": item.available_copies }),
            ),
            CirculationEvent::ItemDeleted { item, actor_id } => {
                (Some(*actor_id), "DELETE", "catalog_items", item.id, json!({}))
            }
            CirculationEvent::Borrowed { record, actor_id } => (
                Some(*actor_id),
                "BORROW",
                "borrowings",
                record.id,
                json!({ "borrower_id": record.borrower_id, "item_id": record.item_id, "due_at": record.due_at }),
            ),
            CirculationEvent::Returned { record, actor_id } => (
                Some(*actor_id),
                "RETURN",
                "borrowings",
                record.id,
                json!({ "item_id": record.item_id, "fine_amount": record.fine_amount.to_string() }),
            ),
            CirculationEvent::FineSettled { record, actor_id } => (
                Some(*actor_id),
                "SETTLE_FINE",
                "borrowings",
                record.id,
                json!({ "fine_amount": record.fine_amount.to_string() }),
            ),
            CirculationEvent::MarkedOverdue { record, .. } => (
                None,
                "OVERDUE",
                "borrowings",
                record.id,
                json!({ "due_at": record.due_at }),
            ),
            CirculationEvent::ReservationCreated { reservation, actor_id } => (
                Some(*actor_id),
                "RESERVE",
                "reservations",
                reservation.id,
                json!({ "item_id": reservation.item_id, "queue_position": reservation.queue_position }),
            ),
            CirculationEvent::ReservationFulfillable { reservation, .. } => (
                None,
                "FULFILLABLE",
                "reservations",
                reservation.id,
                json!({ "item_id": reservation.item_id }),
            ),
            CirculationEvent::ReservationCancelled { reservation, actor_id } => (
                *actor_id,
                "CANCEL",
                "reservations",
                reservation.id,
                json!({ "item_id": reservation.item_id }),
            ),
            CirculationEvent::ReservationCompleted { reservation } => (
                Some(reservation.borrower_id),
                "COMPLETE",
                "reservations",
                reservation.id,
                json!({ "item_id": reservation.item_id }),
            ),
            CirculationEvent::ReservationExpired { reservation, .. } => (
                None,
                "EXPIRE",
                "reservations",
                reservation.id,
                json!({ "item_id": reservation.item_id }),
            ),
        };

        AuditEntry {
            actor_id,
            action,
            entity_type,
            entity_id,
            details,
            at,
        }
    }

    /// Message for the borrower, if this change concerns them directly
    pub fn notification(&self) -> Option<Notification> {
        match self {
            CirculationEvent::ReservationFulfillable { reservation, title } => Some(Notification {
                recipient_id: reservation.borrower_id,
                item_id: reservation.item_id,
                message: format!("\"{}\" is available for you to borrow.", title),
                kind: NotificationKind::ReservationFulfillable,
            }),
            CirculationEvent::ReservationExpired { reservation, title } => Some(Notification {
                recipient_id: reservation.borrower_id,
                item_id: reservation.item_id,
                message: format!("Your hold on \"{}\" expired before it was borrowed.", title),
                kind: NotificationKind::ReservationExpired,
            }),
            CirculationEvent::MarkedOverdue { record, title } => Some(Notification {
                recipient_id: record.borrower_id,
                item_id: record.item_id,
                message: format!("\"{}\" was due on {}.", title, record.due_at.format("%Y-%m-%d")),
                kind: NotificationKind::LoanOverdue,
            }),
            _ => None,
        }
    }
}

/// Sending half of the event channel
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<CirculationEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CirculationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Fire and forget. A closed channel is logged, never reported to the caller.
    pub fn emit_all(&self, events: Vec<CirculationEvent>) {
        for event in events {
            if self.sender.send(event).is_err() {
                tracing::warn!("Event dispatcher is gone; dropping circulation event");
            }
        }
    }
}

/// Drain the channel, forwarding each event to the audit sink and the notifier.
///
/// Audit entries are stamped with `clock`, the same clock the engine uses.
pub async fn run_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<CirculationEvent>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
) {
    while let Some(event) = receiver.recv().await {
        dispatch_one(&event, clock.now(), notifier.as_ref(), audit.as_ref()).await;
    }
    tracing::info!("Circulation event channel closed; dispatcher stopping");
}

async fn dispatch_one(
    event: &CirculationEvent,
    at: DateTime<Utc>,
    notifier: &dyn NotificationDispatcher,
    audit: &dyn AuditSink,
) {
    let entry = event.audit_entry(at);
    if let Err(e) = audit.record(&entry).await {
        tracing::warn!(action = entry.action, entity_id = entry.entity_id, "Audit write failed: {}", e);
    }

    if let Some(notification) = event.notification() {
        if let Err(e) = notifier.dispatch(&notification).await {
            tracing::warn!(
                recipient_id = notification.recipient_id,
                item_id = notification.item_id,
                "Notification dispatch failed: {}",
                e
            );
        }
    }
}
