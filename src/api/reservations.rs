//! Reservation (hold) endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::{AppError, AppResult},
    models::{reservation::CreateReservation, Reservation, ReservationQuery},
};

use super::AuthenticatedActor;

/// Join the queue of an unavailable item
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = CreateReservation,
    responses(
        (status = 201, description = "Reservation queued", body = Reservation),
        (status = 409, description = "Item available or duplicate reservation")
    )
)]
pub async fn create_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Json(mut request): Json<CreateReservation>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    request.borrower_id = Some(claims.borrower_for(request.borrower_id)?);

    let reservation = state.services.reservations.enqueue(request, claims.user_id).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// List reservations, newest first
#[utoipa::path(
    get,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(ReservationQuery),
    responses(
        (status = 200, description = "List of reservations", body = Vec<Reservation>)
    )
)]
pub async fn list_reservations(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Query(mut query): Query<ReservationQuery>,
) -> AppResult<Json<Vec<Reservation>>> {
    query.borrower_id = claims.scope_borrower(query.borrower_id)?;

    let reservations = state.services.reservations.list(&query).await?;
    Ok(Json(reservations))
}

/// Get a reservation by ID
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation details", body = Reservation),
        (status = 404, description = "Reservation not found")
    )
)]
pub async fn get_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    let reservation = state.services.reservations.get(id).await?;
    if !claims.is_staff() && reservation.borrower_id != claims.user_id {
        return Err(AppError::Authorization("Not your reservation".to_string()));
    }
    Ok(Json(reservation))
}

/// Cancel a reservation (holder or staff)
#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation cancelled", body = Reservation),
        (status = 403, description = "Not the holder"),
        (status = 409, description = "Reservation no longer active")
    )
)]
pub async fn cancel_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<Reservation>> {
    let reservation = state
        .services
        .reservations
        .cancel(id, claims.user_id, claims.is_staff())
        .await?;
    Ok(Json(reservation))
}
