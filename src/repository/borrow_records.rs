//! Borrow records repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    models::{
        borrow_record::{BorrowRecord, BorrowRecordQuery, BorrowStatus, NewBorrowRecord},
        page_bounds,
    },
};

#[derive(Clone)]
pub struct BorrowRecordsRepository {
    pool: Pool<Postgres>,
}

impl BorrowRecordsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get borrow record by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<BorrowRecord> {
        sqlx::query_as::<_, BorrowRecord>("SELECT * FROM borrow_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))
    }

    /// List borrow records, newest first.
    ///
    /// The status filter is evaluated against `returned_at` and `due_at` rather
    /// than the cached status column.
    pub async fn list(
        &self,
        query: &BorrowRecordQuery,
        now: DateTime<Utc>,
    ) -> AppResult<(Vec<BorrowRecord>, i64)> {
        let (limit, offset) = page_bounds(query.page, query.per_page);

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM borrow_records WHERE TRUE");
        push_filters(&mut select, query, now);
        select
            .push(" ORDER BY borrowed_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let records = select
            .build_query_as::<BorrowRecord>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM borrow_records WHERE TRUE");
        push_filters(&mut count, query, now);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok((records, total))
    }

    /// Count open loans held by a borrower across all items
    pub async fn count_open_for_borrower(&self, borrower_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrow_records WHERE borrower_id = $1 AND returned_at IS NULL",
        )
        .bind(borrower_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Loans past due whose cached status has not caught up yet
    pub async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowRecord>> {
        let records = sqlx::query_as::<_, BorrowRecord>(
            r#"
            SELECT * FROM borrow_records
            WHERE status = 'ACTIVE' AND returned_at IS NULL AND due_at < $1
            ORDER BY due_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BorrowRecordQuery, now: DateTime<Utc>) {
    if let Some(borrower_id) = query.borrower_id {
        builder.push(" AND borrower_id = ").push_bind(borrower_id);
    }
    if let Some(item_id) = query.item_id {
        builder.push(" AND item_id = ").push_bind(item_id);
    }
    match query.status {
        Some(BorrowStatus::Returned) => {
            builder.push(" AND returned_at IS NOT NULL");
        }
        Some(BorrowStatus::Overdue) => {
            builder.push(" AND returned_at IS NULL AND due_at < ").push_bind(now);
        }
        Some(BorrowStatus::Active) => {
            builder.push(" AND returned_at IS NULL AND due_at >= ").push_bind(now);
        }
        None => {}
    }
}

/// Get a borrow record of the locked item
pub async fn get_for_item(conn: &mut PgConnection, item_id: i32, id: i32) -> AppResult<BorrowRecord> {
    sqlx::query_as::<_, BorrowRecord>("SELECT * FROM borrow_records WHERE id = $1 AND item_id = $2")
        .bind(id)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Borrow record with id {} not found", id)))
}

/// Open loans of the locked item
pub async fn open_for_item(conn: &mut PgConnection, item_id: i32) -> AppResult<Vec<BorrowRecord>> {
    let records = sqlx::query_as::<_, BorrowRecord>(
        "SELECT * FROM borrow_records WHERE item_id = $1 AND returned_at IS NULL ORDER BY id",
    )
    .bind(item_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(records)
}

/// Insert a new active loan
pub async fn insert(conn: &mut PgConnection, record: &NewBorrowRecord) -> AppResult<BorrowRecord> {
    let created = sqlx::query_as::<_, BorrowRecord>(
        r#"
        INSERT INTO borrow_records (borrower_id, item_id, borrowed_at, due_at, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(record.borrower_id)
    .bind(record.item_id)
    .bind(record.borrowed_at)
    .bind(record.due_at)
    .bind(BorrowStatus::Active)
    .fetch_one(&mut *conn)
    .await?;
    Ok(created)
}

/// Persist the mutable columns of a loan
pub async fn save(conn: &mut PgConnection, record: &BorrowRecord) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE borrow_records
        SET returned_at = $2, status = $3, fine_amount = $4, fine_settled = $5, processed_by = $6
        WHERE id = $1
        "#,
    )
    .bind(record.id)
    .bind(record.returned_at)
    .bind(record.status)
    .bind(record.fine_amount)
    .bind(record.fine_settled)
    .bind(record.processed_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
