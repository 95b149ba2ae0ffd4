//! Catalog Item Store: bounded copy counters and item administration

use chrono::{DateTime, Utc};
use thiserror::Error;
use validator::Validate;

use crate::{
    error::{AppError, AppResult, CirculationError},
    models::{
        catalog_item::CatalogItemQuery, CatalogItem, CreateCatalogItem, Reservation,
        ReservationStatus,
    },
    repository::ItemTransaction,
};

use super::{engine::EngineContext, events::CirculationEvent, reservations};

/// Outcome of a rejected copy counter change
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("no copy left to lend")]
    Depleted,
    #[error("releasing a copy would exceed the total")]
    OverCapacity,
    #[error(transparent)]
    Store(#[from] AppError),
}

/// Take one copy of the locked item: `available - 1` iff `available > 0`
pub async fn try_reserve_copy(tx: &mut dyn ItemTransaction, now: DateTime<Utc>) -> Result<(), CopyError> {
    let item = tx.item();
    if item.available_copies <= 0 {
        return Err(CopyError::Depleted);
    }
    let (total, available) = (item.total_copies, item.available_copies - 1);
    tx.write_item_copies(total, available, now).await?;
    Ok(())
}

/// Put one copy back: `available + 1` iff the result stays within the total
pub async fn release_copy(tx: &mut dyn ItemTransaction, now: DateTime<Utc>) -> Result<(), CopyError> {
    let item = tx.item();
    if item.available_copies >= item.total_copies {
        return Err(CopyError::OverCapacity);
    }
    let (total, available) = (item.total_copies, item.available_copies + 1);
    tx.write_item_copies(total, available, now).await?;
    Ok(())
}

/// Copies lent out must equal the open loans of the item
pub fn verify_conservation(item: &CatalogItem, open_loans: usize) -> AppResult<()> {
    if !item.bounds_hold() {
        return Err(AppError::invariant(format!(
            "item {}: available copies {} outside 0..={}",
            item.id, item.available_copies, item.total_copies
        )));
    }
    if item.copies_on_loan() as usize != open_loans {
        return Err(AppError::invariant(format!(
            "item {}: {} copies out but {} open loans",
            item.id,
            item.copies_on_loan(),
            open_loans
        )));
    }
    Ok(())
}

/// Available copies earmarked for fulfillable reservations
pub fn held_copies(live: &[Reservation]) -> i32 {
    live.iter()
        .filter(|r| r.status == ReservationStatus::Fulfillable)
        .count() as i32
}

/// Available copies nobody holds a claim on
pub fn unclaimed_copies(item: &CatalogItem, live: &[Reservation]) -> i32 {
    item.available_copies - held_copies(live)
}

#[derive(Clone)]
pub struct CatalogService {
    ctx: EngineContext,
}

impl CatalogService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Register a new item; every copy starts on the shelf
    pub async fn create_item(&self, request: CreateCatalogItem, actor_id: i32) -> AppResult<CatalogItem> {
        request.validate()?;
        let item = self.ctx.store.create_item(&request, self.ctx.clock.now()).await?;
        tracing::info!(item_id = item.id, total_copies = item.total_copies, "Catalog item created");
        self.ctx.events.emit_all(vec![CirculationEvent::ItemCreated {
            item: item.clone(),
            actor_id,
        }]);
        Ok(item)
    }

    pub async fn get_item(&self, id: i32) -> AppResult<CatalogItem> {
        self.ctx.store.get_item(id).await
    }

    pub async fn list_items(&self, query: &CatalogItemQuery) -> AppResult<(Vec<CatalogItem>, i64)> {
        self.ctx.store.list_items(query).await
    }

    /// Change the number of owned copies. Copies on loan or held for a
    /// fulfillable reservation cannot be removed; added copies go to the queue first.
    pub async fn adjust_total_copies(&self, item_id: i32, total_copies: i32, actor_id: i32) -> AppResult<CatalogItem> {
        if total_copies < 0 {
            return Err(AppError::Validation("Total copies cannot be negative".to_string()));
        }
        self.ctx
            .run_atomic("adjust_total_copies", move || self.adjust_once(item_id, total_copies, actor_id))
            .await
    }

    async fn adjust_once(&self, item_id: i32, total_copies: i32, actor_id: i32) -> AppResult<CatalogItem> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let before = tx.item().clone();
        let delta = total_copies - before.total_copies;
        let available = before.available_copies + delta;
        if available < 0 {
            return Err(AppError::Validation(format!(
                "{} copies of item {} are on loan and cannot be removed",
                before.copies_on_loan(),
                item_id
            )));
        }
        let live = tx.live_reservations().await?;
        if available < held_copies(&live) {
            return Err(AppError::Validation(format!(
                "copies of item {} are held for fulfillable reservations",
                item_id
            )));
        }

        tx.write_item_copies(total_copies, available, now).await?;
        let open_loans = tx.open_loans().await?;
        verify_conservation(tx.item(), open_loans.len())?;

        let mut events = Vec::new();
        if delta > 0 {
            events = reservations::advance(tx.as_mut(), now).await?;
        }
        reservations::verify_queue(tx.as_mut()).await?;

        let item = tx.item().clone();
        tx.commit().await?;

        tracing::info!(item_id, total_copies, available_copies = item.available_copies, "Catalog item copies adjusted");
        events.insert(
            0,
            CirculationEvent::CopiesAdjusted {
                item: item.clone(),
                actor_id,
            },
        );
        self.ctx.events.emit_all(events);
        Ok(item)
    }

    /// Remove an item that has no open loans; live reservations are cancelled with it
    pub async fn delete_item(&self, item_id: i32, actor_id: i32) -> AppResult<()> {
        self.ctx
            .run_atomic("delete_item", move || self.delete_once(item_id, actor_id))
            .await
    }

    async fn delete_once(&self, item_id: i32, actor_id: i32) -> AppResult<()> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let open_loans = tx.open_loans().await?;
        if !open_loans.is_empty() {
            return Err(CirculationError::ItemHasOpenLoans {
                item_id,
                open_loans: open_loans.len() as i64,
            }
            .into());
        }

        let mut events = Vec::new();
        for mut reservation in tx.live_reservations().await? {
            reservation.status = ReservationStatus::Cancelled;
            reservation.closed_at = Some(now);
            tx.save_reservation(&reservation).await?;
            events.push(CirculationEvent::ReservationCancelled {
                reservation,
                actor_id: Some(actor_id),
            });
        }

        let item = tx.item().clone();
        tx.delete_item().await?;
        tx.commit().await?;

        tracing::info!(item_id, cancelled_reservations = events.len(), "Catalog item deleted");
        events.push(CirculationEvent::ItemDeleted { item, actor_id });
        self.ctx.events.emit_all(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::repository::{memory::MemoryStore, CirculationStore};

    async fn locked_item(store: &MemoryStore, copies: i32) -> Box<dyn ItemTransaction> {
        let item = store
            .create_item(
                &CreateCatalogItem {
                    title: "Ronggeng Dukuh Paruk".to_string(),
                    total_copies: copies,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        store.begin(item.id, Duration::from_millis(100)).await.unwrap()
    }

    #[tokio::test]
    async fn reserve_stops_at_zero() {
        let store = MemoryStore::new();
        let mut tx = locked_item(&store, 1).await;

        try_reserve_copy(tx.as_mut(), Utc::now()).await.unwrap();
        assert_eq!(tx.item().available_copies, 0);
        assert!(matches!(
            try_reserve_copy(tx.as_mut(), Utc::now()).await,
            Err(CopyError::Depleted)
        ));
        assert_eq!(tx.item().available_copies, 0);
    }

    #[tokio::test]
    async fn release_stops_at_total() {
        let store = MemoryStore::new();
        let mut tx = locked_item(&store, 2).await;

        assert!(matches!(
            release_copy(tx.as_mut(), Utc::now()).await,
            Err(CopyError::OverCapacity)
        ));
        try_reserve_copy(tx.as_mut(), Utc::now()).await.unwrap();
        release_copy(tx.as_mut(), Utc::now()).await.unwrap();
        assert_eq!(tx.item().available_copies, 2);
    }

    #[tokio::test]
    async fn conservation_mismatch_is_an_invariant_violation() {
        let store = MemoryStore::new();
        let mut tx = locked_item(&store, 2).await;
        try_reserve_copy(tx.as_mut(), Utc::now()).await.unwrap();

        assert!(verify_conservation(tx.item(), 1).is_ok());
        assert!(matches!(
            verify_conservation(tx.item(), 0),
            Err(AppError::InvariantViolation(_))
        ));
    }
}
