//! Circulation Ledger: the borrow/return state machine

use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult, CirculationError},
    models::{
        borrow_record::NewBorrowRecord, BorrowRecord, BorrowRecordQuery, BorrowStatus,
        ReservationStatus,
    },
};

use super::{
    catalog::{self, CopyError},
    engine::EngineContext,
    events::CirculationEvent,
    fines,
    policy::offset,
    reservations,
};

#[derive(Clone)]
pub struct CirculationService {
    ctx: EngineContext,
}

impl CirculationService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Lend one copy of `item_id` to `borrower_id`.
    ///
    /// A borrower holding a fulfillable reservation for the item takes the copy
    /// earmarked for them and the reservation completes. Anyone else needs an
    /// unclaimed copy.
    pub async fn borrow(
        &self,
        borrower_id: i32,
        item_id: i32,
        requested_due_at: Option<DateTime<Utc>>,
        actor_id: i32,
    ) -> AppResult<BorrowRecord> {
        self.ctx
            .run_atomic("borrow", move || {
                self.borrow_once(borrower_id, item_id, requested_due_at, actor_id)
            })
            .await
    }

    async fn borrow_once(
        &self,
        borrower_id: i32,
        item_id: i32,
        requested_due_at: Option<DateTime<Utc>>,
        actor_id: i32,
    ) -> AppResult<BorrowRecord> {
        let policy = self.ctx.policy.snapshot();
        let now = self.ctx.clock.now();

        let due_at = match requested_due_at {
            Some(due_at) if due_at <= now => {
                return Err(AppError::Validation("Due date must be in the future".to_string()))
            }
            Some(due_at) if due_at > offset(now, policy.max_loan_duration()?)? => {
                return Err(AppError::Validation(format!(
                    "Loans cannot exceed {} days",
                    policy.max_borrow_duration_days
                )))
            }
            Some(due_at) => due_at,
            None => offset(now, policy.default_loan_duration()?)?,
        };

        // Spans items, so it runs before the item lock is taken
        let open = self.ctx.store.count_open_loans_for_borrower(borrower_id).await?;
        if open >= policy.max_loans_per_borrower {
            return Err(CirculationError::MaxLoansReached {
                borrower_id,
                max: policy.max_loans_per_borrower,
            }
            .into());
        }

        let mut tx = self.ctx.begin(item_id).await?;

        let open_loans = tx.open_loans().await?;
        if open_loans.iter().any(|l| l.borrower_id == borrower_id) {
            return Err(CirculationError::DuplicateActiveLoan { borrower_id, item_id }.into());
        }

        let live = tx.live_reservations().await?;
        let claim = live
            .iter()
            .find(|r| r.borrower_id == borrower_id && r.status == ReservationStatus::Fulfillable)
            .cloned();
        if claim.is_none() && catalog::unclaimed_copies(tx.item(), &live) <= 0 {
            return Err(CirculationError::ItemUnavailable { item_id }.into());
        }

        match catalog::try_reserve_copy(tx.as_mut(), now).await {
            Ok(()) => {}
            Err(CopyError::Depleted) => return Err(CirculationError::ItemUnavailable { item_id }.into()),
            Err(CopyError::OverCapacity) => {
                return Err(AppError::invariant(format!("item {}: reserve reported over capacity", item_id)))
            }
            Err(CopyError::Store(e)) => return Err(e),
        }

        let record = tx
            .insert_borrow_record(&NewBorrowRecord {
                borrower_id,
                item_id,
                borrowed_at: now,
                due_at,
            })
            .await?;

        let mut events = vec![CirculationEvent::Borrowed {
            record: record.clone(),
            actor_id,
        }];
        if let Some(claim) = claim {
            events.push(reservations::complete(tx.as_mut(), claim, now).await?);
        }

        catalog::verify_conservation(tx.item(), open_loans.len() + 1)?;
        reservations::verify_queue(tx.as_mut()).await?;
        tx.commit().await?;

        tracing::info!(record_id = record.id, item_id, borrower_id, due_at = %record.due_at, "Item borrowed");
        self.ctx.events.emit_all(events);
        Ok(record)
    }

    /// Close a loan, charge the fine for lateness and pass the copy on
    pub async fn return_item(&self, record_id: i32, actor_id: i32) -> AppResult<BorrowRecord> {
        self.ctx
            .run_atomic("return_item", move || self.return_once(record_id, actor_id))
            .await
    }

    async fn return_once(&self, record_id: i32, actor_id: i32) -> AppResult<BorrowRecord> {
        // Read outside the item lock; the lock comes from the loan's item
        let item_id = self.ctx.store.get_borrow_record(record_id).await?.item_id;
        let policy = self.ctx.policy.snapshot();
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let mut record = tx.borrow_record(record_id).await?;
        if !record.is_open() {
            return Err(CirculationError::AlreadyReturned { record_id }.into());
        }

        record.returned_at = Some(now);
        record.status = BorrowStatus::Returned;
        record.fine_amount = fines::compute_fine(record.due_at, now, policy.per_day_rate);
        record.processed_by = Some(actor_id);
        tx.save_borrow_record(&record).await?;

        match catalog::release_copy(tx.as_mut(), now).await {
            Ok(()) => {}
            Err(CopyError::OverCapacity) => {
                return Err(AppError::invariant(format!(
                    "item {}: returning record {} would exceed total copies",
                    item_id, record_id
                )))
            }
            Err(CopyError::Depleted) => {
                return Err(AppError::invariant(format!("item {}: release reported depleted", item_id)))
            }
            Err(CopyError::Store(e)) => return Err(e),
        }

        let mut events = vec![CirculationEvent::Returned {
            record: record.clone(),
            actor_id,
        }];
        events.extend(reservations::advance(tx.as_mut(), now).await?);

        let open_loans = tx.open_loans().await?;
        catalog::verify_conservation(tx.item(), open_loans.len())?;
        reservations::verify_queue(tx.as_mut()).await?;
        tx.commit().await?;

        tracing::info!(
            record_id,
            item_id,
            borrower_id = record.borrower_id,
            fine = %record.fine_amount,
            "Item returned"
        );
        self.ctx.events.emit_all(events);
        Ok(record)
    }

    /// Mark the outstanding fine of a returned loan as paid
    pub async fn settle_fine(&self, record_id: i32, actor_id: i32) -> AppResult<BorrowRecord> {
        self.ctx
            .run_atomic("settle_fine", move || self.settle_once(record_id, actor_id))
            .await
    }

    async fn settle_once(&self, record_id: i32, actor_id: i32) -> AppResult<BorrowRecord> {
        let item_id = self.ctx.store.get_borrow_record(record_id).await?.item_id;
        let mut tx = self.ctx.begin(item_id).await?;

        let mut record = tx.borrow_record(record_id).await?;
        if record.is_open() || !record.has_outstanding_fine() {
            return Err(CirculationError::FineNotOutstanding { record_id }.into());
        }
        record.fine_settled = true;
        tx.save_borrow_record(&record).await?;
        tx.commit().await?;

        tracing::info!(record_id, amount = %record.fine_amount, "Fine settled");
        self.ctx.events.emit_all(vec![CirculationEvent::FineSettled {
            record: record.clone(),
            actor_id,
        }]);
        Ok(record)
    }

    /// Refresh the cached status of a loan that went past due.
    ///
    /// Returns `false` if the loan was returned or already marked meanwhile.
    pub async fn mark_overdue(&self, record_id: i32, item_id: i32) -> AppResult<bool> {
        self.ctx
            .run_atomic("mark_overdue", move || self.mark_overdue_once(record_id, item_id))
            .await
    }

    async fn mark_overdue_once(&self, record_id: i32, item_id: i32) -> AppResult<bool> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.begin(item_id).await?;

        let mut record = tx.borrow_record(record_id).await?;
        if record.status != BorrowStatus::Active || record.status_at(now) != BorrowStatus::Overdue {
            return Ok(false);
        }
        record.status = BorrowStatus::Overdue;
        tx.save_borrow_record(&record).await?;
        let title = tx.item().title.clone();
        tx.commit().await?;

        tracing::info!(record_id, item_id, borrower_id = record.borrower_id, "Loan marked overdue");
        self.ctx
            .events
            .emit_all(vec![CirculationEvent::MarkedOverdue { record, title }]);
        Ok(true)
    }

    pub async fn get(&self, id: i32) -> AppResult<BorrowRecord> {
        let record = self.ctx.store.get_borrow_record(id).await?;
        Ok(record.with_status_at(self.ctx.clock.now()))
    }

    /// Newest first, with the status derived at the time of the query
    pub async fn list(&self, query: &BorrowRecordQuery) -> AppResult<(Vec<BorrowRecord>, i64)> {
        let now = self.ctx.clock.now();
        let (records, total) = self.ctx.store.list_borrow_records(query, now).await?;
        Ok((
            records.into_iter().map(|r| r.with_status_at(now)).collect(),
            total,
        ))
    }
}
