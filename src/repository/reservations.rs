//! Reservations repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use crate::{
    error::{AppError, AppResult},
    models::reservation::{NewReservation, Reservation, ReservationQuery, ReservationStatus},
};

#[derive(Clone)]
pub struct ReservationsRepository {
    pool: Pool<Postgres>,
}

impl ReservationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get reservation by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
    }

    /// List reservations, newest first
    pub async fn list(&self, query: &ReservationQuery) -> AppResult<Vec<Reservation>> {
        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM reservations WHERE TRUE");
        if let Some(borrower_id) = query.borrower_id {
            select.push(" AND borrower_id = ").push_bind(borrower_id);
        }
        if let Some(item_id) = query.item_id {
            select.push(" AND item_id = ").push_bind(item_id);
        }
        if let Some(status) = query.status {
            select.push(" AND status = ").push_bind(status);
        }
        select.push(" ORDER BY requested_at DESC, id DESC");

        let reservations = select
            .build_query_as::<Reservation>()
            .fetch_all(&self.pool)
            .await?;
        Ok(reservations)
    }

    /// Fulfillable reservations whose holder was notified before `cutoff`
    pub async fn expired_holds(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = $1 AND notified_at < $2
            ORDER BY notified_at
            "#,
        )
        .bind(ReservationStatus::Fulfillable)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(reservations)
    }
}

/// Get a reservation of the locked item
pub async fn get_for_item(conn: &mut PgConnection, item_id: i32, id: i32) -> AppResult<Reservation> {
    sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1 AND item_id = $2")
        .bind(id)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Reservation with id {} not found", id)))
}

/// Waiting and fulfillable reservations of the locked item
pub async fn live_for_item(conn: &mut PgConnection, item_id: i32) -> AppResult<Vec<Reservation>> {
    let reservations = sqlx::query_as::<_, Reservation>(
        r#"
        SELECT * FROM reservations
        WHERE item_id = $1 AND status IN ($2, $3)
        ORDER BY queue_position, requested_at
        "#,
    )
    .bind(item_id)
    .bind(ReservationStatus::Waiting)
    .bind(ReservationStatus::Fulfillable)
    .fetch_all(&mut *conn)
    .await?;
    Ok(reservations)
}

/// Insert a new waiting reservation
pub async fn insert(conn: &mut PgConnection, reservation: &NewReservation) -> AppResult<Reservation> {
    let created = sqlx::query_as::<_, Reservation>(
        r#"
        INSERT INTO reservations (borrower_id, item_id, requested_at, status, queue_position)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(reservation.borrower_id)
    .bind(reservation.item_id)
    .bind(reservation.requested_at)
    .bind(ReservationStatus::Waiting)
    .bind(reservation.queue_position)
    .fetch_one(&mut *conn)
    .await?;
    Ok(created)
}

/// Persist the mutable columns of a reservation
pub async fn save(conn: &mut PgConnection, reservation: &Reservation) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE reservations
        SET status = $2, queue_position = $3, notified_at = $4, closed_at = $5
        WHERE id = $1
        "#,
    )
    .bind(reservation.id)
    .bind(reservation.status)
    .bind(reservation.queue_position)
    .bind(reservation.notified_at)
    .bind(reservation.closed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Close the gap left at `position` in a single pass
pub async fn shift_waiting_after(conn: &mut PgConnection, item_id: i32, position: i32) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE reservations
        SET queue_position = queue_position - 1
        WHERE item_id = $1 AND status = $2 AND queue_position > $3
        "#,
    )
    .bind(item_id)
    .bind(ReservationStatus::Waiting)
    .bind(position)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
