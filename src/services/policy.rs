//! Circulation policy: fine schedule, loan durations and limits.
//!
//! The live policy sits behind a [`PolicyHandle`]. Operations take a snapshot
//! when they start, so an update only affects operations begun after it.

use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
};

pub const KEY_FINE_PER_DAY: &str = "fine_per_day";
pub const KEY_BORROW_DURATION_DAYS: &str = "borrow_duration_days";
pub const KEY_MAX_BORROW_DURATION_DAYS: &str = "max_borrow_duration_days";
pub const KEY_MAX_BORROW_PER_USER: &str = "max_borrow_per_user";
pub const KEY_RESERVATION_GRACE_HOURS: &str = "reservation_grace_hours";

/// Upper bounds keeping every derived date representable
pub const MAX_LOAN_DAYS: i64 = 3650;
pub const MAX_GRACE_HOURS: i64 = 8760;
pub const MAX_LOANS_PER_BORROWER: i64 = 1000;

/// Rules applied to new circulation operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CirculationPolicy {
    #[schema(value_type = String)]
    pub per_day_rate: Decimal,
    pub default_loan_days: i64,
    pub max_borrow_duration_days: i64,
    pub max_loans_per_borrower: i64,
    pub grace_window_hours: i64,
}

impl From<&CirculationConfig> for CirculationPolicy {
    fn from(config: &CirculationConfig) -> Self {
        Self {
            per_day_rate: config.per_day_rate,
            default_loan_days: config.default_loan_days,
            max_borrow_duration_days: config.max_borrow_duration_days,
            max_loans_per_borrower: config.max_loans_per_borrower,
            grace_window_hours: config.grace_window_hours,
        }
    }
}

impl CirculationPolicy {
    pub fn default_loan_duration(&self) -> AppResult<Duration> {
        span(Duration::try_days(self.default_loan_days), "loan duration")
    }

    pub fn max_loan_duration(&self) -> AppResult<Duration> {
        span(Duration::try_days(self.max_borrow_duration_days), "maximum loan duration")
    }

    pub fn grace_window(&self) -> AppResult<Duration> {
        span(Duration::try_hours(self.grace_window_hours), "grace window")
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.per_day_rate < Decimal::ZERO {
            return Err(AppError::Validation("Fine per day cannot be negative".to_string()));
        }
        if !(1..=MAX_LOAN_DAYS).contains(&self.default_loan_days) {
            return Err(AppError::Validation(format!(
                "Loan duration must be between 1 and {} days",
                MAX_LOAN_DAYS
            )));
        }
        if self.max_borrow_duration_days > MAX_LOAN_DAYS {
            return Err(AppError::Validation(format!(
                "Maximum loan duration cannot exceed {} days",
                MAX_LOAN_DAYS
            )));
        }
        if self.max_borrow_duration_days < self.default_loan_days {
            return Err(AppError::Validation(
                "Maximum loan duration cannot be shorter than the default".to_string(),
            ));
        }
        if !(1..=MAX_LOANS_PER_BORROWER).contains(&self.max_loans_per_borrower) {
            return Err(AppError::Validation(format!(
                "Loan limit must be between 1 and {}",
                MAX_LOANS_PER_BORROWER
            )));
        }
        if !(0..=MAX_GRACE_HOURS).contains(&self.grace_window_hours) {
            return Err(AppError::Validation(format!(
                "Grace window must be between 0 and {} hours",
                MAX_GRACE_HOURS
            )));
        }
        Ok(())
    }

    /// Layer stored key/value overrides on top of this policy. Unknown keys are ignored.
    pub fn apply_overrides(&mut self, values: &[(String, String)]) -> AppResult<()> {
        for (key, value) in values {
            let bad = |_| AppError::Validation(format!("Invalid value for {}: {}", key, value));
            match key.as_str() {
                KEY_FINE_PER_DAY => self.per_day_rate = value.trim().parse().map_err(bad)?,
                KEY_BORROW_DURATION_DAYS => self.default_loan_days = parse_int(key, value)?,
                KEY_MAX_BORROW_DURATION_DAYS => self.max_borrow_duration_days = parse_int(key, value)?,
                KEY_MAX_BORROW_PER_USER => self.max_loans_per_borrower = parse_int(key, value)?,
                KEY_RESERVATION_GRACE_HOURS => self.grace_window_hours = parse_int(key, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Stored form of this policy
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_FINE_PER_DAY, self.per_day_rate.to_string()),
            (KEY_BORROW_DURATION_DAYS, self.default_loan_days.to_string()),
            (KEY_MAX_BORROW_DURATION_DAYS, self.max_borrow_duration_days.to_string()),
            (KEY_MAX_BORROW_PER_USER, self.max_loans_per_borrower.to_string()),
            (KEY_RESERVATION_GRACE_HOURS, self.grace_window_hours.to_string()),
        ]
    }

    /// Merge a partial update, then validate the result
    pub fn updated(&self, update: &UpdateCirculationPolicy) -> AppResult<Self> {
        let mut next = self.clone();
        if let Some(rate) = update.per_day_rate {
            next.per_day_rate = rate;
        }
        if let Some(days) = update.default_loan_days {
            next.default_loan_days = days;
        }
        if let Some(days) = update.max_borrow_duration_days {
            next.max_borrow_duration_days = days;
        }
        if let Some(max) = update.max_loans_per_borrower {
            next.max_loans_per_borrower = max;
        }
        if let Some(hours) = update.grace_window_hours {
            next.grace_window_hours = hours;
        }
        next.validate()?;
        Ok(next)
    }
}

fn span(duration: Option<Duration>, what: &str) -> AppResult<Duration> {
    duration.ok_or_else(|| AppError::Validation(format!("The {} is out of range", what)))
}

/// `at + by`, or a validation error when the date is not representable
pub fn offset(at: DateTime<Utc>, by: Duration) -> AppResult<DateTime<Utc>> {
    at.checked_add_signed(by)
        .ok_or_else(|| AppError::Validation("Date is out of range".to_string()))
}

fn parse_int(key: &str, value: &str) -> AppResult<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid value for {}: {}", key, value)))
}

/// Partial policy update request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateCirculationPolicy {
    #[schema(value_type = Option<String>)]
    pub per_day_rate: Option<Decimal>,
    #[validate(range(min = 1, max = 3650))]
    pub default_loan_days: Option<i64>,
    #[validate(range(min = 1, max = 3650))]
    pub max_borrow_duration_days: Option<i64>,
    #[validate(range(min = 1, max = 1000))]
    pub max_loans_per_borrower: Option<i64>,
    #[validate(range(min = 0, max = 8760))]
    pub grace_window_hours: Option<i64>,
}

/// Shared, swappable policy
#[derive(Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<CirculationPolicy>>,
}

impl PolicyHandle {
    pub fn new(policy: CirculationPolicy) -> Self {
        Self {
            current: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn snapshot(&self) -> CirculationPolicy {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, policy: CirculationPolicy) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }
}

/// Engine knobs fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct EngineTuning {
    pub lock_timeout: StdDuration,
    pub retry_attempts: u32,
    pub retry_base_backoff: StdDuration,
}

impl From<&CirculationConfig> for EngineTuning {
    fn from(config: &CirculationConfig) -> Self {
        Self {
            lock_timeout: StdDuration::from_millis(config.lock_timeout_ms),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_backoff: StdDuration::from_millis(config.retry_base_backoff_ms),
        }
    }
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self::from(&CirculationConfig::default())
    }
}
