//! Repository layer: the storage seam of the circulation engine.
//!
//! Every mutation runs inside an [`ItemTransaction`] scoped to a single catalog
//! item. Opening one takes that item's lock (a `SELECT ... FOR UPDATE` row lock
//! in PostgreSQL, a per-item async mutex in memory), so mutations on the same
//! item serialize while different items proceed independently. Dropping a
//! transaction without committing discards all of its writes.

pub mod audit_logs;
pub mod borrow_records;
pub mod catalog_items;
pub mod memory;
pub mod notifications;
pub mod reservations;
pub mod settings;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        borrow_record::NewBorrowRecord,
        catalog_item::CatalogItemQuery,
        reservation::NewReservation,
        BorrowRecord, BorrowRecordQuery, CatalogItem, CreateCatalogItem, Reservation,
        ReservationQuery,
    },
};

/// Read access and transaction factory for circulation state
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// Open a transaction holding the lock of `item_id`.
    ///
    /// Fails with `NotFound` if the item does not exist and with `Busy` if the
    /// lock cannot be taken within `lock_timeout`.
    async fn begin(&self, item_id: i32, lock_timeout: Duration) -> AppResult<Box<dyn ItemTransaction>>;

    async fn create_item(&self, item: &CreateCatalogItem, now: DateTime<Utc>) -> AppResult<CatalogItem>;
    async fn get_item(&self, id: i32) -> AppResult<CatalogItem>;
    async fn list_items(&self, query: &CatalogItemQuery) -> AppResult<(Vec<CatalogItem>, i64)>;

    async fn get_borrow_record(&self, id: i32) -> AppResult<BorrowRecord>;
    /// Newest first. Status filters use the status derived at `now`.
    async fn list_borrow_records(
        &self,
        query: &BorrowRecordQuery,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<BorrowRecord>, i64)>;
    async fn count_open_loans_for_borrower(&self, borrower_id: i32) -> AppResult<i64>;
    /// Open loans past due whose stored status is still `ACTIVE`
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowRecord>>;

    async fn get_reservation(&self, id: i32) -> AppResult<Reservation>;
    async fn list_reservations(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>>;
    /// Fulfillable reservations notified before `cutoff`
    async fn expired_holds(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>>;
}

/// Unit of work over one locked catalog item and the rows referencing it
#[async_trait]
pub trait ItemTransaction: Send {
    /// The locked item as currently written by this transaction
    fn item(&self) -> &CatalogItem;

    async fn write_item_copies(
        &mut self,
        total_copies: i32,
        available_copies: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()>;
    async fn delete_item(&mut self) -> AppResult<()>;

    /// Loan of this item; `NotFound` if it references another item
    async fn borrow_record(&mut self, id: i32) -> AppResult<BorrowRecord>;
    async fn open_loans(&mut self) -> AppResult<Vec<BorrowRecord>>;
    async fn insert_borrow_record(&mut self, record: &NewBorrowRecord) -> AppResult<BorrowRecord>;
    async fn save_borrow_record(&mut self, record: &BorrowRecord) -> AppResult<()>;

    /// Reservation of this item; `NotFound` if it references another item
    async fn reservation(&mut self, id: i32) -> AppResult<Reservation>;
    /// Waiting and fulfillable reservations, ordered by queue position
    async fn live_reservations(&mut self) -> AppResult<Vec<Reservation>>;
    async fn insert_reservation(&mut self, reservation: &NewReservation) -> AppResult<Reservation>;
    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;
    /// Move every waiting reservation behind `position` one place forward
    async fn shift_waiting_after(&mut self, position: i32) -> AppResult<u64>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// PostgreSQL-backed repository holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub catalog_items: catalog_items::CatalogItemsRepository,
    pub borrow_records: borrow_records::BorrowRecordsRepository,
    pub reservations: reservations::ReservationsRepository,
    pub notifications: notifications::NotificationsRepository,
    pub audit_logs: audit_logs::AuditLogsRepository,
    pub settings: settings::SettingsRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            catalog_items: catalog_items::CatalogItemsRepository::new(pool.clone()),
            borrow_records: borrow_records::BorrowRecordsRepository::new(pool.clone()),
            reservations: reservations::ReservationsRepository::new(pool.clone()),
            notifications: notifications::NotificationsRepository::new(pool.clone()),
            audit_logs: audit_logs::AuditLogsRepository::new(pool.clone()),
            settings: settings::SettingsRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl CirculationStore for Repository {
    async fn begin(&self, item_id: i32, lock_timeout: Duration) -> AppResult<Box<dyn ItemTransaction>> {
        let mut tx = tokio::time::timeout(lock_timeout, self.pool.begin())
            .await
            .map_err(|_| AppError::Busy("timed out acquiring a database connection".to_string()))??;

        // SET does not accept bind parameters; the value is an integer we format ourselves.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        let item = catalog_items::lock_for_update(&mut tx, item_id).await?;
        Ok(Box::new(PgItemTransaction { tx, item }))
    }

    async fn create_item(&self, item: &CreateCatalogItem, now: DateTime<Utc>) -> AppResult<CatalogItem> {
        self.catalog_items.create(item, now).await
    }

    async fn get_item(&self, id: i32) -> AppResult<CatalogItem> {
        self.catalog_items.get_by_id(id).await
    }

    async fn list_items(&self, query: &CatalogItemQuery) -> AppResult<(Vec<CatalogItem>, i64)> {
        self.catalog_items.list(query).await
    }

    async fn get_borrow_record(&self, id: i32) -> AppResult<BorrowRecord> {
        self.borrow_records.get_by_id(id).await
    }

    async fn list_borrow_records(
        &self,
        query: &BorrowRecordQuery,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<BorrowRecord>, i64)> {
        self.borrow_records.list(query, now).await
    }

    async fn count_open_loans_for_borrower(&self, borrower_id: i32) -> AppResult<i64> {
        self.borrow_records.count_open_for_borrower(borrower_id).await
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowRecord>> {
        self.borrow_records.overdue_candidates(now).await
    }

    async fn get_reservation(&self, id: i32) -> AppResult<Reservation> {
        self.reservations.get_by_id(id).await
    }

    async fn list_reservations(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>> {
        self.reservations.list(query).await
    }

    async fn expired_holds(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        self.reservations.expired_holds(cutoff).await
    }
}

/// Open PostgreSQL transaction holding the item's row lock
pub struct PgItemTransaction {
    tx: Transaction<'static, Postgres>,
    item: CatalogItem,
}

#[async_trait]
impl ItemTransaction for PgItemTransaction {
    fn item(&self) -> &CatalogItem {
        &self.item
    }

    async fn write_item_copies(
        &mut self,
        total_copies: i32,
        available_copies: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.item =
            catalog_items::write_copies(&mut self.tx, self.item.id, total_copies, available_copies, now)
                .await?;
        Ok(())
    }

    async fn delete_item(&mut self) -> AppResult<()> {
        catalog_items::delete(&mut self.tx, self.item.id).await
    }

    async fn borrow_record(&mut self, id: i32) -> AppResult<BorrowRecord> {
        borrow_records::get_for_item(&mut self.tx, self.item.id, id).await
    }

    async fn open_loans(&mut self) -> AppResult<Vec<BorrowRecord>> {
        borrow_records::open_for_item(&mut self.tx, self.item.id).await
    }

    async fn insert_borrow_record(&mut self, record: &NewBorrowRecord) -> AppResult<BorrowRecord> {
        borrow_records::insert(&mut self.tx, record).await
    }

    async fn save_borrow_record(&mut self, record: &BorrowRecord) -> AppResult<()> {
        borrow_records::save(&mut self.tx, record).await
    }

    async fn reservation(&mut self, id: i32) -> AppResult<Reservation> {
        reservations::get_for_item(&mut self.tx, self.item.id, id).await
    }

    async fn live_reservations(&mut self) -> AppResult<Vec<Reservation>> {
        reservations::live_for_item(&mut self.tx, self.item.id).await
    }

    async fn insert_reservation(&mut self, reservation: &NewReservation) -> AppResult<Reservation> {
        reservations::insert(&mut self.tx, reservation).await
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        reservations::save(&mut self.tx, reservation).await
    }

    async fn shift_waiting_after(&mut self, position: i32) -> AppResult<u64> {
        reservations::shift_waiting_after(&mut self.tx, self.item.id, position).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
