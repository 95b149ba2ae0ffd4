//! Late-return fine calculation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Started days between `due_at` and `returned_at`; zero when returned on time.
///
/// Any partial day counts as a whole one.
pub fn days_late(due_at: DateTime<Utc>, returned_at: DateTime<Utc>) -> i64 {
    if returned_at <= due_at {
        return 0;
    }
    let late = (returned_at - due_at).num_seconds();
    // Sub-second lateness still starts a day
    let late = late.max(1);
    (late + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

/// Fine owed for returning at `returned_at` a loan due at `due_at`
pub fn compute_fine(due_at: DateTime<Utc>, returned_at: DateTime<Utc>, per_day_rate: Decimal) -> Decimal {
    Decimal::from(days_late(due_at, returned_at)) * per_day_rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn on_time_or_early_is_free() {
        let rate = Decimal::new(1000, 0);
        assert_eq!(compute_fine(due(), due(), rate), Decimal::ZERO);
        assert_eq!(compute_fine(due(), due() - Duration::days(3), rate), Decimal::ZERO);
    }

    #[test]
    fn one_minute_late_is_one_day() {
        let rate = Decimal::new(1000, 0);
        let returned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(compute_fine(due(), returned, rate), Decimal::new(1000, 0));
    }

    #[test]
    fn partial_days_round_up() {
        assert_eq!(days_late(due(), due() + Duration::hours(24)), 1);
        assert_eq!(days_late(due(), due() + Duration::hours(25)), 2);
        assert_eq!(days_late(due(), due() + Duration::milliseconds(1)), 1);
    }

    #[test]
    fn six_days_late_after_a_fourteen_day_loan() {
        let borrowed = due() - Duration::days(14);
        let returned = borrowed + Duration::days(20);
        let rate = Decimal::new(250, 0);
        assert_eq!(compute_fine(due(), returned, rate), Decimal::new(1500, 0));
    }

    #[test]
    fn fractional_rates_are_exact() {
        let rate = Decimal::new(125, 2); // 1.25
        assert_eq!(
            compute_fine(due(), due() + Duration::days(3), rate),
            Decimal::new(375, 2)
        );
    }
}
