//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{borrowings, health, items, reservations, settings, sweep};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pustaka Circulation API",
        version = "1.0.0",
        description = "Library circulation and reservation REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Items
        items::list_items,
        items::get_item,
        items::create_item,
        items::update_copies,
        items::delete_item,
        items::item_queue,
        // Borrowings
        borrowings::create_borrowing,
        borrowings::list_borrowings,
        borrowings::get_borrowing,
        borrowings::return_borrowing,
        borrowings::settle_fine,
        // Reservations
        reservations::create_reservation,
        reservations::list_reservations,
        reservations::get_reservation,
        reservations::cancel_reservation,
        // Settings
        settings::get_circulation_settings,
        settings::update_circulation_settings,
        // Maintenance
        sweep::run_sweep,
    ),
    components(
        schemas(
            // Items
            crate::models::CatalogItem,
            crate::models::CreateCatalogItem,
            crate::models::catalog_item::UpdateCopies,
            crate::models::catalog_item::CatalogItemQuery,
            // Borrowings
            crate::models::BorrowRecord,
            crate::models::BorrowStatus,
            crate::models::BorrowRecordQuery,
            crate::models::borrow_record::CreateBorrowRecord,
            // Reservations
            crate::models::Reservation,
            crate::models::ReservationStatus,
            crate::models::ReservationQuery,
            crate::models::reservation::CreateReservation,
            // Settings
            crate::services::policy::CirculationPolicy,
            crate::services::policy::UpdateCirculationPolicy,
            // Maintenance
            crate::services::sweep::SweepReport,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "items", description = "Catalog items and copy counts"),
        (name = "borrowings", description = "Loans, returns and fines"),
        (name = "reservations", description = "Reservation queue"),
        (name = "settings", description = "Circulation policy"),
        (name = "maintenance", description = "Overdue and hold expiry sweep")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
