//! Reservation Queue: per-item FIFO of holds
//!
//! Waiting reservations of an item are ranked `1..=n` by enqueue order.
//! When the queue advances, the head becomes fulfillable and keeps its
//! position frozen while the waiters behind it move up one place. A
//! fulfillable reservation holds one of the item's available copies until its
//! holder borrows, cancels, or the grace window expires.

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::{AppError, AppResult, CirculationError},
    models::{
        reservation::{CreateReservation, NewReservation},
        Reservation, ReservationQuery, ReservationStatus,
    },
    repository::ItemTransaction,
};

use super::{catalog::unclaimed_copies, engine::EngineContext, events::CirculationEvent};

/// Promote waiters while the item has copies nobody holds a claim on
pub async fn advance(tx: &mut dyn ItemTransaction, now: DateTime<Utc>) -> AppResult<Vec<CirculationEvent>> {
    let mut events = Vec::new();
    loop {
        let live = tx.live_reservations().await?;
        if unclaimed_copies(tx.item(), &live) <= 0 {
            break;
        }
        let Some(mut head) = live
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Waiting)
            .min_by_key(|r| r.queue_position)
        else {
            break;
        };

        head.status = ReservationStatus::Fulfillable;
        head.notified_at = Some(now);
        tx.save_reservation(&head).await?;
        tx.shift_waiting_after(head.queue_position).await?;

        tracing::info!(
            reservation_id = head.id,
            item_id = head.item_id,
            borrower_id = head.borrower_id,
            "Reservation is now fulfillable"
        );
        events.push(CirculationEvent::ReservationFulfillable {
            reservation: head,
            title: tx.item().title.clone(),
        });
    }
    Ok(events)
}

/// Close the holder's fulfillable claim after they borrowed the item.
///
/// Only a fulfillable claim can complete; it has already left the waiting
/// order, so no queue position moves.
pub async fn complete(
    tx: &mut dyn ItemTransaction,
    mut reservation: Reservation,
    now: DateTime<Utc>,
) -> AppResult<CirculationEvent> {
    if reservation.status != ReservationStatus::Fulfillable {
        return Err(AppError::invariant(format!(
            "reservation {} completed while {:?}",
            reservation.id, reservation.status
        )));
    }
    reservation.status = ReservationStatus::Completed;
    reservation.closed_at = Some(now);
    tx.save_reservation(&reservation).await?;
    tracing::info!(
        reservation_id = reservation.id,
        item_id = reservation.item_id,
        borrower_id = reservation.borrower_id,
        "Reservation completed"
    );
    Ok(CirculationEvent::ReservationCompleted { reservation })
}

/// Take a live reservation out of the queue, then hand a freed claim to the next waiter
pub async fn close_and_advance(
    tx: &mut dyn ItemTransaction,
    mut reservation: Reservation,
    now: DateTime<Utc>,
) -> AppResult<(Reservation, Vec<CirculationEvent>)> {
    let previous = reservation.status;
    reservation.status = ReservationStatus::Cancelled;
    reservation.closed_at = Some(now);
    tx.save_reservation(&reservation).await?;

    let events = match previous {
        ReservationStatus::Waiting => {
            tx.shift_waiting_after(reservation.queue_position).await?;
            Vec::new()
        }
        _ => advance(tx, now).await?,
    };
    Ok((reservation, events))
}

/// Waiting positions must be exactly `1..=n`
pub async fn verify_queue(tx: &mut dyn ItemTransaction) -> AppResult<()> {
    let mut positions: Vec<i32> = tx
        .live_reservations()
        .await?
        .iter()
        .filter(|r| r.status == ReservationStatus::Waiting)
        .map(|r| r.queue_position)
        .collect();
    positions.sort_unstable();
    for (expected, actual) in (1..).zip(&positions) {
        if *actual != expected {
            return Err(AppError::invariant(format!(
                "item {}: waiting queue positions {:?} are not contiguous",
                tx.item().id,
                positions
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReservationService {
    ctx: EngineContext,
}

impl ReservationService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Join the queue of an item that has no unclaimed copy
    pub async fn enqueue(&self, request: CreateReservation, actor_id: i32) -> AppResult<Reservation> {
        request.validate()?;
        let borrower_id = request.borrower_id.unwrap_or(actor_id);
        let item_id = request.item_id;
        self.ctx
            .run_atomic("enqueue", move || self.enqueue_once(borrower_id, item_id, actor_id))
            .await
    }

    async fn enqueue_once(&self, borrower_id: i32, item_id: i32, actor_id: i32) -> AppResult<Reservation> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let live = tx.live_reservations().await?;
        if live.iter().any(|r| r.borrower_id == borrower_id) {
            return Err(CirculationError::DuplicateReservation { borrower_id, item_id }.into());
        }
        // A copy already in hand cannot be reserved again
        if tx.open_loans().await?.iter().any(|l| l.borrower_id == borrower_id) {
            return Err(CirculationError::DuplicateActiveLoan { borrower_id, item_id }.into());
        }
        if unclaimed_copies(tx.item(), &live) > 0 {
            return Err(CirculationError::ItemAvailable { item_id }.into());
        }

        let waiting = live
            .iter()
            .filter(|r| r.status == ReservationStatus::Waiting)
            .count() as i32;
        let reservation = tx
            .insert_reservation(&NewReservation {
                borrower_id,
                item_id,
                requested_at: now,
                queue_position: waiting + 1,
            })
            .await?;
        verify_queue(tx.as_mut()).await?;
        tx.commit().await?;

        tracing::info!(
            reservation_id = reservation.id,
            item_id,
            borrower_id,
            queue_position = reservation.queue_position,
            "Reservation queued"
        );
        self.ctx.events.emit_all(vec![CirculationEvent::ReservationCreated {
            reservation: reservation.clone(),
            actor_id,
        }]);
        Ok(reservation)
    }

    /// Cancel a live reservation. Only its holder or staff may do so.
    pub async fn cancel(&self, reservation_id: i32, actor_id: i32, is_staff: bool) -> AppResult<Reservation> {
        self.ctx
            .run_atomic("cancel_reservation", move || {
                self.cancel_once(reservation_id, actor_id, is_staff)
            })
            .await
    }

    async fn cancel_once(&self, reservation_id: i32, actor_id: i32, is_staff: bool) -> AppResult<Reservation> {
        let item_id = self.ctx.store.get_reservation(reservation_id).await?.item_id;
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let reservation = tx.reservation(reservation_id).await?;
        if !is_staff && reservation.borrower_id != actor_id {
            return Err(CirculationError::NotReservationHolder { reservation_id, actor_id }.into());
        }
        if !reservation.status.is_live() {
            return Err(CirculationError::ReservationNotActive { reservation_id }.into());
        }

        let (cancelled, mut events) = close_and_advance(tx.as_mut(), reservation, now).await?;
        verify_queue(tx.as_mut()).await?;
        tx.commit().await?;

        tracing::info!(reservation_id, item_id, actor_id, "Reservation cancelled");
        events.insert(
            0,
            CirculationEvent::ReservationCancelled {
                reservation: cancelled.clone(),
                actor_id: Some(actor_id),
            },
        );
        self.ctx.events.emit_all(events);
        Ok(cancelled)
    }

    /// Cancel a fulfillable reservation whose grace window ran out.
    ///
    /// Returns `None` if the hold was already resolved by the time the item
    /// lock was taken.
    pub async fn expire_hold(&self, reservation_id: i32, item_id: i32, cutoff: DateTime<Utc>) -> AppResult<Option<Reservation>> {
        self.ctx
            .run_atomic("expire_hold", move || self.expire_once(reservation_id, item_id, cutoff))
            .await
    }

    async fn expire_once(&self, reservation_id: i32, item_id: i32, cutoff: DateTime<Utc>) -> AppResult<Option<Reservation>> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let reservation = tx.reservation(reservation_id).await?;
        let still_expired = reservation.status == ReservationStatus::Fulfillable
            && reservation.notified_at.map_or(false, |at| at < cutoff);
        if !still_expired {
            return Ok(None);
        }

        let title = tx.item().title.clone();
        let (expired, events) = close_and_advance(tx.as_mut(), reservation, now).await?;
        verify_queue(tx.as_mut()).await?;
        tx.commit().await?;

        tracing::info!(reservation_id, item_id, borrower_id = expired.borrower_id, "Reservation hold expired");
        let mut all = vec![CirculationEvent::ReservationExpired {
            reservation: expired.clone(),
            title,
        }];
        all.extend(events);
        self.ctx.events.emit_all(all);
        Ok(Some(expired))
    }

    pub async fn get(&self, id: i32) -> AppResult<Reservation> {
        self.ctx.store.get_reservation(id).await
    }

    pub async fn list(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>> {
        self.ctx.store.list_reservations(query).await
    }

    /// Waiting reservations of an item in queue order
    pub async fn item_queue(&self, item_id: i32) -> AppResult<Vec<Reservation>> {
        self.ctx.store.get_item(item_id).await?;
        let mut waiting = self
            .ctx
            .store
            .list_reservations(&ReservationQuery {
                item_id: Some(item_id),
                status: Some(ReservationStatus::Waiting),
                ..Default::default()
            })
            .await?;
        waiting.sort_by_key(|r| r.queue_position);
        Ok(waiting)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        models::CreateCatalogItem,
        repository::{memory::MemoryStore, CirculationStore},
    };

    #[tokio::test]
    async fn only_fulfillable_claims_complete() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let item = store
            .create_item(
                &CreateCatalogItem {
                    title: "Cantik Itu Luka".to_string(),
                    total_copies: 1,
                },
                now,
            )
            .await
            .unwrap();

        let mut tx = store.begin(item.id, Duration::from_millis(50)).await.unwrap();
        let waiting = tx
            .insert_reservation(&NewReservation {
                borrower_id: 7,
                item_id: item.id,
                requested_at: now,
                queue_position: 1,
            })
            .await
            .unwrap();
        assert_eq!(waiting.status, ReservationStatus::Waiting);

        let err = complete(tx.as_mut(), waiting.clone(), now).await.unwrap_err();
        assert!(matches!(err, AppError::InvariantViolation(_)));

        let mut claim = waiting;
        claim.status = ReservationStatus::Fulfillable;
        claim.notified_at = Some(now);
        let event = complete(tx.as_mut(), claim, now).await.unwrap();
        match event {
            CirculationEvent::ReservationCompleted { reservation } => {
                assert_eq!(reservation.status, ReservationStatus::Completed);
                assert_eq!(reservation.closed_at, Some(now));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
