//! Catalog item endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        catalog_item::{CatalogItemQuery, UpdateCopies},
        CatalogItem, CreateCatalogItem, Reservation,
    },
};

use super::AuthenticatedActor;

/// Paginated response wrapper
#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T>
where
    T: for<'a> ToSchema<'a>,
{
    /// Rows of the requested page
    pub items: Vec<T>,
    /// Total number of matching rows
    pub total: i64,
    /// Current page number
    pub page: i64,
    /// Rows per page
    pub per_page: i64,
}

/// List catalog items
#[utoipa::path(
    get,
    path = "/items",
    tag = "items",
    security(("bearer_auth" = [])),
    params(CatalogItemQuery),
    responses(
        (status = 200, description = "List of items", body = PaginatedResponse<CatalogItem>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_items(
    State(state): State<crate::AppState>,
    AuthenticatedActor(_claims): AuthenticatedActor,
    Query(query): Query<CatalogItemQuery>,
) -> AppResult<Json<PaginatedResponse<CatalogItem>>> {
    let (items, total) = state.services.catalog.list_items(&query).await?;

    Ok(Json(PaginatedResponse {
        items,
        total,
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }))
}

/// Get item by ID
#[utoipa::path(
    get,
    path = "/items/{id}",
    tag = "items",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item details", body = CatalogItem),
        (status = 404, description = "Item not found")
    )
)]
pub async fn get_item(
    State(state): State<crate::AppState>,
    AuthenticatedActor(_claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<CatalogItem>> {
    let item = state.services.catalog.get_item(id).await?;
    Ok(Json(item))
}

/// Register a new catalog item
#[utoipa::path(
    post,
    path = "/items",
    tag = "items",
    security(("bearer_auth" = [])),
    request_body = CreateCatalogItem,
    responses(
        (status = 201, description = "Item created", body = CatalogItem),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Staff role required")
    )
)]
pub async fn create_item(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Json(request): Json<CreateCatalogItem>,
) -> AppResult<(StatusCode, Json<CatalogItem>)> {
    claims.require_staff()?;

    let item = state.services.catalog.create_item(request, claims.user_id).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Change the number of owned copies
#[utoipa::path(
    put,
    path = "/items/{id}/copies",
    tag = "items",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    request_body = UpdateCopies,
    responses(
        (status = 200, description = "Copies updated", body = CatalogItem),
        (status = 400, description = "Copies on loan or held cannot be removed"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn update_copies(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
    Json(request): Json<UpdateCopies>,
) -> AppResult<Json<CatalogItem>> {
    claims.require_staff()?;

    let item = state
        .services
        .catalog
        .adjust_total_copies(id, request.total_copies, claims.user_id)
        .await?;
    Ok(Json(item))
}

/// Delete an item without open loans
#[utoipa::path(
    delete,
    path = "/items/{id}",
    tag = "items",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item has open loans")
    )
)]
pub async fn delete_item(
    State(state): State<crate::AppState>,
    AuthenticatedActor(claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    claims.require_staff()?;

    state.services.catalog.delete_item(id, claims.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Waiting reservations of an item in queue order
#[utoipa::path(
    get,
    path = "/items/{id}/queue",
    tag = "items",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Reservation queue", body = Vec<Reservation>),
        (status = 404, description = "Item not found")
    )
)]
pub async fn item_queue(
    State(state): State<crate::AppState>,
    AuthenticatedActor(_claims): AuthenticatedActor,
    Path(id): Path<i32>,
) -> AppResult<Json<Vec<Reservation>>> {
    let queue = state.services.reservations.item_queue(id).await?;
    Ok(Json(queue))
}
