//! Borrowing (loan) endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{borrow_record::CreateBorrowRecord, BorrowRecord, BorrowRecordQuery},
};

use super::{items::PaginatedResponse, AuthenticatedActor};

/// Borrow a copy of an item
#[utoipa::path(
    post,
    path = "/borrowings",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    request_body = CreateBorrowRecord,
    responses(
        (status = 201, description = "Loan created", body = BorrowRecord),
        (status = 400, description = "Invalid due date"),
        (status = 409, description = "No copy available or duplicate loan"),
        (status = 422, description = "Loan limit reached"),
        (status = 503, description = "Busy, retry later")
    )
)]
pub async fn create_borrowing(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Json(request): Json<CreateBorrowRecord>,
) -> AppResult<(StatusCode, Json<BorrowRecord>)> {
    request.validate()?;
    let borrower_id = claims.borrower_for(request.borrower_id)?;

    let record = state
        .services
        .circulation
        .borrow(borrower_id, request.item_id, request.due_at, claims.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List loans, newest first
#[utoipa::path(
    get,
    path = "/borrowings",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(BorrowRecordQuery),
    responses(
        (status = 200, description = "List of loans", body = PaginatedResponse<BorrowRecord>)
    )
)]
pub async fn list_borrowings(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Query(mut query): Query<BorrowRecordQuery>,
) -> AppResult<Json<PaginatedResponse<BorrowRecord>>> {
    query.borrower_id = claims.scope_borrower(query.borrower_id)?;

    let (items, total) = state.services.circulation.list(&query).await?;
    Ok(Json(PaginatedResponse {
        items,
        total,
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }))
}

/// Get a loan by ID
#[utoipa::path(
    get,
    path = "/borrowings/{id}",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    responses(
        (status = 200, description = "Loan details", body = BorrowRecord),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_borrowing(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowRecord>> {
    let record = state.services.circulation.get(id).await?;
    if !claims.is_staff() && record.borrower_id != claims.user_id {
        return Err(AppError::Authorization("Not your loan".to_string()));
    }
    Ok(Json(record))
}

/// Return a borrowed copy
#[utoipa::path(
    put,
    path = "/borrowings/{id}/return",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    responses(
        (status = 200, description = "Loan closed", body = BorrowRecord),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_borrowing(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowRecord>> {
    claims.require_staff()?;

    let record = state.services.circulation.return_item(id, claims.user_id).await?;
    Ok(Json(record))
}

/// Mark the fine of a returned loan as paid
#[utoipa::path(
    post,
    path = "/borrowings/{id}/settle-fine",
    tag = "borrowings",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    responses(
        (status = 200, description = "Fine settled", body = BorrowRecord),
        (status = 409, description = "No outstanding fine")
    )
)]
pub async fn settle_fine(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowRecord>> {
    claims.require_staff()?;

    let record = state.services.circulation.settle_fine(id, claims.user_id).await?;
    Ok(Json(record))
}
