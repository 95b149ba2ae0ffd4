//! In-process circulation store.
//!
//! Each catalog item lives in its own partition together with every loan and
//! reservation that references it, behind a per-item async mutex. A transaction
//! owns the mutex guard and edits a private copy of the partition; commit swaps
//! the copy in, drop throws it away.

use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{
        borrow_record::{BorrowStatus, NewBorrowRecord},
        catalog_item::CatalogItemQuery,
        page_bounds,
        reservation::NewReservation,
        BorrowRecord, BorrowRecordQuery, CatalogItem, CreateCatalogItem, Reservation,
        ReservationQuery, ReservationStatus,
    },
};

use super::{CirculationStore, ItemTransaction};

#[derive(Debug, Clone)]
struct ItemPartition {
    item: CatalogItem,
    loans: Vec<BorrowRecord>,
    reservations: Vec<Reservation>,
    /// Set once the item is deleted, for transactions still queued on the lock
    deleted: bool,
}

type SharedPartition = Arc<Mutex<ItemPartition>>;

#[derive(Default)]
struct Inner {
    partitions: DashMap<i32, SharedPartition>,
    /// Reverse lookups: loan / reservation id → item id
    loan_items: DashMap<i32, i32>,
    reservation_items: DashMap<i32, i32>,
    next_item_id: AtomicI32,
    next_loan_id: AtomicI32,
    next_reservation_id: AtomicI32,
}

impl Inner {
    fn partition(&self, item_id: i32) -> AppResult<SharedPartition> {
        self.partitions
            .get(&item_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("Catalog item with id {} not found", item_id)))
    }

    /// Snapshot of every partition handle, so no map guard is held across an await
    fn all_partitions(&self) -> Vec<SharedPartition> {
        self.partitions.iter().map(|e| e.value().clone()).collect()
    }
}

/// Circulation store keeping everything in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_id(counter: &AtomicI32) -> i32 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

#[async_trait]
impl CirculationStore for MemoryStore {
    async fn begin(&self, item_id: i32, lock_timeout: Duration) -> AppResult<Box<dyn ItemTransaction>> {
        let partition = self.inner.partition(item_id)?;
        let guard = tokio::time::timeout(lock_timeout, partition.lock_owned())
            .await
            .map_err(|_| AppError::Busy(format!("timed out waiting for the lock of item {}", item_id)))?;

        if guard.deleted {
            return Err(AppError::NotFound(format!("Catalog item with id {} not found", item_id)));
        }

        let working = (*guard).clone();
        Ok(Box::new(MemoryItemTransaction {
            inner: self.inner.clone(),
            guard,
            working,
        }))
    }

    async fn create_item(&self, item: &CreateCatalogItem, now: DateTime<Utc>) -> AppResult<CatalogItem> {
        let created = CatalogItem {
            id: next_id(&self.inner.next_item_id),
            title: item.title.clone(),
            total_copies: item.total_copies,
            available_copies: item.total_copies,
            created_at: now,
            updated_at: now,
        };
        let partition = ItemPartition {
            item: created.clone(),
            loans: Vec::new(),
            reservations: Vec::new(),
            deleted: false,
        };
        self.inner
            .partitions
            .insert(created.id, Arc::new(Mutex::new(partition)));
        Ok(created)
    }

    async fn get_item(&self, id: i32) -> AppResult<CatalogItem> {
        let partition = self.inner.partition(id)?;
        let guard = partition.lock().await;
        Ok(guard.item.clone())
    }

    async fn list_items(&self, query: &CatalogItemQuery) -> AppResult<(Vec<CatalogItem>, i64)> {
        let mut items = Vec::new();
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            if !guard.deleted {
                items.push(guard.item.clone());
            }
        }
        items.sort_by_key(|i| i.id);
        Ok(paginate(items, query.page, query.per_page))
    }

    async fn get_borrow_record(&self, id: i32) -> AppResult<BorrowRecord> {
        let not_found = || AppError::NotFound(format!("Borrow record with id {} not found", id));
        let item_id = self.inner.loan_items.get(&id).map(|e| *e.value()).ok_or_else(not_found)?;
        let partition = self.inner.partition(item_id).map_err(|_| not_found())?;
        let guard = partition.lock().await;
        guard.loans.iter().find(|l| l.id == id).cloned().ok_or_else(not_found)
    }

    async fn list_borrow_records(
        &self,
        query: &BorrowRecordQuery,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<BorrowRecord>, i64)> {
        let mut records = Vec::new();
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            if guard.deleted || query.item_id.map_or(false, |id| id != guard.item.id) {
                continue;
            }
            records.extend(
                guard
                    .loans
                    .iter()
                    .filter(|l| query.borrower_id.map_or(true, |b| l.borrower_id == b))
                    .filter(|l| query.status.map_or(true, |s| l.status_at(now) == s))
                    .cloned(),
            );
        }
        records.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at).then(b.id.cmp(&a.id)));
        Ok(paginate(records, query.page, query.per_page))
    }

    async fn count_open_loans_for_borrower(&self, borrower_id: i32) -> AppResult<i64> {
        let mut count = 0;
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            count += guard
                .loans
                .iter()
                .filter(|l| l.borrower_id == borrower_id && l.is_open())
                .count() as i64;
        }
        Ok(count)
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowRecord>> {
        let mut records = Vec::new();
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            records.extend(
                guard
                    .loans
                    .iter()
                    .filter(|l| l.status == BorrowStatus::Active && l.is_open() && l.due_at < now)
                    .cloned(),
            );
        }
        records.sort_by_key(|l| l.due_at);
        Ok(records)
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Reservation> {
        let not_found = || AppError::NotFound(format!("Reservation with id {} not found", id));
        let item_id = self
            .inner
            .reservation_items
            .get(&id)
            .map(|e| *e.value())
            .ok_or_else(not_found)?;
        let partition = self.inner.partition(item_id).map_err(|_| not_found())?;
        let guard = partition.lock().await;
        guard.reservations.iter().find(|r| r.id == id).cloned().ok_or_else(not_found)
    }

    async fn list_reservations(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>> {
        let mut reservations = Vec::new();
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            if guard.deleted || query.item_id.map_or(false, |id| id != guard.item.id) {
                continue;
            }
            reservations.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| query.borrower_id.map_or(true, |b| r.borrower_id == b))
                    .filter(|r| query.status.map_or(true, |s| r.status == s))
                    .cloned(),
            );
        }
        reservations.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(reservations)
    }

    async fn expired_holds(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let mut reservations = Vec::new();
        for partition in self.inner.all_partitions() {
            let guard = partition.lock().await;
            reservations.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| {
                        r.status == ReservationStatus::Fulfillable
                            && r.notified_at.map_or(false, |at| at < cutoff)
                    })
                    .cloned(),
            );
        }
        reservations.sort_by_key(|r| r.notified_at);
        Ok(reservations)
    }
}

fn paginate<T>(rows: Vec<T>, page: Option<i64>, per_page: Option<i64>) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let (limit, offset) = page_bounds(page, per_page);
    let rows = rows
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    (rows, total)
}

/// Transaction over one locked partition
struct MemoryItemTransaction {
    inner: Arc<Inner>,
    guard: OwnedMutexGuard<ItemPartition>,
    working: ItemPartition,
}

#[async_trait]
impl ItemTransaction for MemoryItemTransaction {
    fn item(&self) -> &CatalogItem {
        &self.working.item
    }

    async fn write_item_copies(
        &mut self,
        total_copies: i32,
        available_copies: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        // Mirrors the CHECK constraint of the relational schema
        if total_copies < 0 || available_copies < 0 || available_copies > total_copies {
            return Err(AppError::invariant(format!(
                "item {}: copy counters {}/{} out of bounds",
                self.working.item.id, available_copies, total_copies
            )));
        }
        let item = &mut self.working.item;
        item.total_copies = total_copies;
        item.available_copies = available_copies;
        item.updated_at = now;
        Ok(())
    }

    async fn delete_item(&mut self) -> AppResult<()> {
        self.working.deleted = true;
        Ok(())
    }

    async fn borrow_record(&mut self, id: i32) -> AppResult<BorrowRecord> {
        self.working
            .loans
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))
    }

    async fn open_loans(&mut self) -> AppResult<Vec<BorrowRecord>> {
        Ok(self.working.loans.iter().filter(|l| l.is_open()).cloned().collect())
    }

    async fn insert_borrow_record(&mut self, record: &NewBorrowRecord) -> AppResult<BorrowRecord> {
        // Mirrors the partial unique index on open loans
        if self
            .working
            .loans
            .iter()
            .any(|l| l.is_open() && l.borrower_id == record.borrower_id)
        {
            return Err(AppError::invariant(format!(
                "second open loan of item {} for borrower {}",
                record.item_id, record.borrower_id
            )));
        }
        let created = BorrowRecord {
            id: next_id(&self.inner.next_loan_id),
            borrower_id: record.borrower_id,
            item_id: record.item_id,
            borrowed_at: record.borrowed_at,
            due_at: record.due_at,
            returned_at: None,
            status: BorrowStatus::Active,
            fine_amount: Default::default(),
            fine_settled: false,
            processed_by: None,
        };
        self.working.loans.push(created.clone());
        Ok(created)
    }

    async fn save_borrow_record(&mut self, record: &BorrowRecord) -> AppResult<()> {
        let slot = self
            .working
            .loans
            .iter_mut()
            .find(|l| l.id == record.id)
            .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", record.id)))?;
        *slot = record.clone();
        Ok(())
    }

    async fn reservation(&mut self, id: i32) -> AppResult<Reservation> {
        self.working
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
    }

    async fn live_reservations(&mut self) -> AppResult<Vec<Reservation>> {
        let mut live: Vec<Reservation> = self
            .working
            .reservations
            .iter()
            .filter(|r| r.status.is_live())
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            a.queue_position
                .cmp(&b.queue_position)
                .then(a.requested_at.cmp(&b.requested_at))
        });
        Ok(live)
    }

    async fn insert_reservation(&mut self, reservation: &NewReservation) -> AppResult<Reservation> {
        let created = Reservation {
            id: next_id(&self.inner.next_reservation_id),
            borrower_id: reservation.borrower_id,
            item_id: reservation.item_id,
            requested_at: reservation.requested_at,
            status: ReservationStatus::Waiting,
            queue_position: reservation.queue_position,
            notified_at: None,
            closed_at: None,
        };
        self.working.reservations.push(created.clone());
        Ok(created)
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        let slot = self
            .working
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation.id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Reservation with id {} not found", reservation.id))
            })?;
        *slot = reservation.clone();
        Ok(())
    }

    async fn shift_waiting_after(&mut self, position: i32) -> AppResult<u64> {
        let mut shifted = 0;
        for r in self.working.reservations.iter_mut() {
            if r.status == ReservationStatus::Waiting && r.queue_position > position {
                r.queue_position -= 1;
                shifted += 1;
            }
        }
        Ok(shifted)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryItemTransaction {
            inner,
            mut guard,
            working,
        } = *self;
        let item_id = working.item.id;

        if working.deleted {
            for loan in &working.loans {
                inner.loan_items.remove(&loan.id);
            }
            for reservation in &working.reservations {
                inner.reservation_items.remove(&reservation.id);
            }
            inner.partitions.remove(&item_id);
        } else {
            for loan in &working.loans {
                inner.loan_items.insert(loan.id, item_id);
            }
            for reservation in &working.reservations {
                inner.reservation_items.insert(reservation.id, item_id);
            }
        }

        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item(copies: i32) -> CreateCatalogItem {
        CreateCatalogItem {
            title: "Laskar Pelangi".to_string(),
            total_copies: copies,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let item = store.create_item(&new_item(2), Utc::now()).await.unwrap();

        let mut tx = store.begin(item.id, Duration::from_millis(100)).await.unwrap();
        tx.write_item_copies(2, 1, Utc::now()).await.unwrap();
        assert_eq!(tx.item().available_copies, 1);
        drop(tx);

        assert_eq!(store.get_item(item.id).await.unwrap().available_copies, 2);
    }

    #[tokio::test]
    async fn second_transaction_on_same_item_times_out() {
        let store = MemoryStore::new();
        let item = store.create_item(&new_item(1), Utc::now()).await.unwrap();

        let _held = store.begin(item.id, Duration::from_millis(100)).await.unwrap();
        let err = store
            .begin(item.id, Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Busy(_)));
    }

    #[tokio::test]
    async fn different_items_do_not_block_each_other() {
        let store = MemoryStore::new();
        let a = store.create_item(&new_item(1), Utc::now()).await.unwrap();
        let b = store.create_item(&new_item(1), Utc::now()).await.unwrap();

        let _held = store.begin(a.id, Duration::from_millis(100)).await.unwrap();
        assert!(store.begin(b.id, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn page_far_past_the_end_is_empty() {
        let store = MemoryStore::new();
        store.create_item(&new_item(1), Utc::now()).await.unwrap();

        let (items, total) = store
            .list_items(&CatalogItemQuery {
                page: Some(i64::MAX),
                per_page: None,
            })
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn committed_loan_is_visible_through_reverse_lookup() {
        let store = MemoryStore::new();
        let item = store.create_item(&new_item(1), Utc::now()).await.unwrap();
        let now = Utc::now();

        let mut tx = store.begin(item.id, Duration::from_millis(100)).await.unwrap();
        let loan = tx
            .insert_borrow_record(&NewBorrowRecord {
                borrower_id: 7,
                item_id: item.id,
                borrowed_at: now,
                due_at: now + chrono::Duration::days(14),
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let fetched = store.get_borrow_record(loan.id).await.unwrap();
        assert_eq!(fetched.borrower_id, 7);
        assert_eq!(store.count_open_loans_for_borrower(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn out_of_bounds_counters_are_rejected() {
        let store = MemoryStore::new();
        let item = store.create_item(&new_item(1), Utc::now()).await.unwrap();

        let mut tx = store.begin(item.id, Duration::from_millis(100)).await.unwrap();
        let err = tx.write_item_copies(1, 2, Utc::now()).await.err().unwrap();
        assert!(matches!(err, AppError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn deleted_item_is_gone_for_queued_transactions() {
        let store = MemoryStore::new();
        let item = store.create_item(&new_item(1), Utc::now()).await.unwrap();

        let mut tx = store.begin(item.id, Duration::from_millis(100)).await.unwrap();
        tx.delete_item().await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            store.get_item(item.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            store.begin(item.id, Duration::from_millis(20)).await.err(),
            Some(AppError::NotFound(_))
        ));
    }
}
