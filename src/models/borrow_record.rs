//! Borrow record (loan) model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::pg_text_enum;

/// Loan status.
///
/// `Overdue` is derived from `due_at` while the loan is open. The stored column
/// is only a cache refreshed by the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BorrowStatus {
    Active,
    Overdue,
    Returned,
}

impl BorrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowStatus::Active => "ACTIVE",
            BorrowStatus::Overdue => "OVERDUE",
            BorrowStatus::Returned => "RETURNED",
        }
    }

    /// Active and overdue loans both hold a copy
    pub fn is_open(&self) -> bool {
        !matches!(self, BorrowStatus::Returned)
    }
}

impl std::fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BorrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(BorrowStatus::Active),
            "OVERDUE" => Ok(BorrowStatus::Overdue),
            "RETURNED" => Ok(BorrowStatus::Returned),
            _ => Err(format!("Invalid borrow status: {}", s)),
        }
    }
}

pg_text_enum!(BorrowStatus);

/// Borrow record from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowRecord {
    pub id: i32,
    pub borrower_id: i32,
    pub item_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowStatus,
    #[schema(value_type = String)]
    pub fine_amount: Decimal,
    pub fine_settled: bool,
    /// Staff member who processed the return
    pub processed_by: Option<i32>,
}

impl BorrowRecord {
    /// Status as of `now`: returned, or overdue once past due.
    pub fn status_at(&self, now: DateTime<Utc>) -> BorrowStatus {
        if self.returned_at.is_some() {
            BorrowStatus::Returned
        } else if now > self.due_at {
            BorrowStatus::Overdue
        } else {
            BorrowStatus::Active
        }
    }

    /// Replace the stored status with the one derived at `now`
    pub fn with_status_at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.status_at(now);
        self
    }

    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }

    pub fn has_outstanding_fine(&self) -> bool {
        self.fine_amount > Decimal::ZERO && !self.fine_settled
    }
}

/// Insert payload for a new loan
#[derive(Debug, Clone)]
pub struct NewBorrowRecord {
    pub borrower_id: i32,
    pub item_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

/// Borrow request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBorrowRecord {
    #[validate(range(min = 1, message = "item_id is required"))]
    pub item_id: i32,
    /// Staff may lend on behalf of a borrower
    pub borrower_id: Option<i32>,
    /// Defaults to the configured loan duration
    pub due_at: Option<DateTime<Utc>>,
}

/// Loan listing filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BorrowRecordQuery {
    pub borrower_id: Option<i32>,
    pub item_id: Option<i32>,
    pub status: Option<BorrowStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(returned_at: Option<DateTime<Utc>>) -> BorrowRecord {
        let borrowed_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        BorrowRecord {
            id: 1,
            borrower_id: 10,
            item_id: 20,
            borrowed_at,
            due_at: borrowed_at + Duration::days(14),
            returned_at,
            status: BorrowStatus::Active,
            fine_amount: Decimal::ZERO,
            fine_settled: false,
            processed_by: None,
        }
    }

    #[test]
    fn overdue_is_derived_from_due_date() {
        let r = record(None);
        assert_eq!(r.status_at(r.due_at), BorrowStatus::Active);
        assert_eq!(
            r.status_at(r.due_at + Duration::seconds(1)),
            BorrowStatus::Overdue
        );
    }

    #[test]
    fn returned_wins_over_lateness() {
        let r = record(Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
        assert_eq!(
            r.status_at(r.due_at + Duration::days(30)),
            BorrowStatus::Returned
        );
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("overdue".parse::<BorrowStatus>(), Ok(BorrowStatus::Overdue));
        assert!("lost".parse::<BorrowStatus>().is_err());
    }
}
