//! Error types for the circulation server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Numeric error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BadValue = 5,
    ItemUnavailable = 7,
    DuplicateActiveLoan = 8,
    DuplicateReservation = 9,
    AlreadyReturned = 10,
    ItemAvailable = 11,
    MaxLoansReached = 12,
    NotReservationHolder = 13,
    ReservationNotActive = 14,
    FineNotOutstanding = 15,
    ItemHasOpenLoans = 16,
    Busy = 20,
    Unavailable = 21,
    InvariantViolation = 22,
}

/// Business-rule rejections of the circulation engine.
///
/// These are definitive results: retrying the same call cannot change them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CirculationError {
    #[error("item {item_id} has no copy available")]
    ItemUnavailable { item_id: i32 },

    #[error("borrower {borrower_id} already has an open loan of item {item_id}")]
    DuplicateActiveLoan { borrower_id: i32, item_id: i32 },

    #[error("borrower {borrower_id} already has an active reservation for item {item_id}")]
    DuplicateReservation { borrower_id: i32, item_id: i32 },

    #[error("borrow record {record_id} was already returned")]
    AlreadyReturned { record_id: i32 },

    #[error("item {item_id} has a copy available, borrow it instead")]
    ItemAvailable { item_id: i32 },

    #[error("borrower {borrower_id} reached the maximum of {max} open loans")]
    MaxLoansReached { borrower_id: i32, max: i64 },

    #[error("reservation {reservation_id} does not belong to actor {actor_id}")]
    NotReservationHolder { reservation_id: i32, actor_id: i32 },

    #[error("reservation {reservation_id} is no longer active")]
    ReservationNotActive { reservation_id: i32 },

    #[error("borrow record {record_id} has no outstanding fine")]
    FineNotOutstanding { record_id: i32 },

    #[error("item {item_id} still has {open_loans} open loans")]
    ItemHasOpenLoans { item_id: i32, open_loans: i64 },
}

impl CirculationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CirculationError::ItemUnavailable { .. } => ErrorCode::ItemUnavailable,
            CirculationError::DuplicateActiveLoan { .. } => ErrorCode::DuplicateActiveLoan,
            CirculationError::DuplicateReservation { .. } => ErrorCode::DuplicateReservation,
            CirculationError::AlreadyReturned { .. } => ErrorCode::AlreadyReturned,
            CirculationError::ItemAvailable { .. } => ErrorCode::ItemAvailable,
            CirculationError::MaxLoansReached { .. } => ErrorCode::MaxLoansReached,
            CirculationError::NotReservationHolder { .. } => ErrorCode::NotReservationHolder,
            CirculationError::ReservationNotActive { .. } => ErrorCode::ReservationNotActive,
            CirculationError::FineNotOutstanding { .. } => ErrorCode::FineNotOutstanding,
            CirculationError::ItemHasOpenLoans { .. } => ErrorCode::ItemHasOpenLoans,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CirculationError::NotReservationHolder { .. } => StatusCode::FORBIDDEN,
            CirculationError::MaxLoansReached { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::CONFLICT,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Circulation(#[from] CirculationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Lock contention or a write conflict; safe to retry.
    #[error("Busy: {0}")]
    Busy(String),

    /// Transient failure that survived internal retries.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A broken invariant: a defect somewhere in the system.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the engine may retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Busy(_) => true,
            AppError::Database(e) => is_transient_db_error(e),
            _ => false,
        }
    }

    /// Log and build an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(invariant = %msg, "Circulation invariant violated");
        AppError::InvariantViolation(msg)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// PostgreSQL SQLSTATEs that signal contention rather than a bad request.
const TRANSIENT_SQLSTATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

fn is_transient_db_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref()))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Circulation(e) => (e.status(), e.code(), e.to_string()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Busy(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Busy, msg.clone())
            }
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable, msg.clone())
            }
            AppError::InvariantViolation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InvariantViolation,
                "Internal server error".to_string(),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rejections_map_to_conflict() {
        let response = AppError::from(CirculationError::ItemUnavailable { item_id: 4 }).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::from(CirculationError::NotReservationHolder {
            reservation_id: 1,
            actor_id: 2,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn busy_is_transient_but_rejections_are_not() {
        assert!(AppError::Busy("lock".into()).is_transient());
        assert!(!AppError::from(CirculationError::AlreadyReturned { record_id: 1 }).is_transient());
        assert!(!AppError::Unavailable("gave up".into()).is_transient());
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!AppError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn invariant_violation_hides_details() {
        let response = AppError::invariant("available copies above total").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
