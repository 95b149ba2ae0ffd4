//! Reservation (hold) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::pg_text_enum;

/// Reservation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Waiting,
    Fulfillable,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Waiting => "WAITING",
            ReservationStatus::Fulfillable => "FULFILLABLE",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Completed => "COMPLETED",
        }
    }

    /// Waiting and fulfillable reservations still hold a claim
    pub fn is_live(&self) -> bool {
        matches!(self, ReservationStatus::Waiting | ReservationStatus::Fulfillable)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "WAITING" => Ok(ReservationStatus::Waiting),
            "FULFILLABLE" => Ok(ReservationStatus::Fulfillable),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            "COMPLETED" => Ok(ReservationStatus::Completed),
            _ => Err(format!("Invalid reservation status: {}", s)),
        }
    }
}

pg_text_enum!(ReservationStatus);

/// Reservation from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Reservation {
    pub id: i32,
    pub borrower_id: i32,
    pub item_id: i32,
    pub requested_at: DateTime<Utc>,
    pub status: ReservationStatus,
    /// Rank among the item's waiting reservations. Frozen once the
    /// reservation leaves the waiting set.
    pub queue_position: i32,
    pub notified_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new reservation
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub borrower_id: i32,
    pub item_id: i32,
    pub requested_at: DateTime<Utc>,
    pub queue_position: i32,
}

/// Create reservation request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateReservation {
    #[validate(range(min = 1, message = "item_id is required"))]
    pub item_id: i32,
    /// Staff may reserve on behalf of a borrower
    pub borrower_id: Option<i32>,
}

/// Reservation listing filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ReservationQuery {
    pub borrower_id: Option<i32>,
    pub item_id: Option<i32>,
    pub status: Option<ReservationStatus>,
}
