//! Data models for the circulation engine

pub mod actor;
pub mod borrow_record;
pub mod catalog_item;
pub mod notification;
pub mod reservation;

// Re-export commonly used types
pub use actor::{ActorClaims, Role};
pub use borrow_record::{BorrowRecord, BorrowRecordQuery, BorrowStatus};
pub use catalog_item::{CatalogItem, CreateCatalogItem};
pub use notification::{AuditEntry, Notification, NotificationKind};
pub use reservation::{Reservation, ReservationQuery, ReservationStatus};

/// Implements SQLx text encoding for an enum exposing `as_str` and `FromStr<Err = String>`.
macro_rules! pg_text_enum {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s: String = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub(crate) use pg_text_enum;

/// Page/per-page normalisation shared by the list queries
pub(crate) fn page_bounds(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let per_page = per_page.unwrap_or(20).clamp(1, 200);
    let page = page.unwrap_or(1).max(1);
    (per_page, (page - 1).saturating_mul(per_page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_default_and_clamp() {
        assert_eq!(page_bounds(None, None), (20, 0));
        assert_eq!(page_bounds(Some(3), Some(10)), (10, 20));
        assert_eq!(page_bounds(Some(0), Some(0)), (1, 0));
        assert_eq!(page_bounds(Some(-5), Some(1000)), (200, 0));
    }

    #[test]
    fn huge_page_saturates_instead_of_overflowing() {
        assert_eq!(page_bounds(Some(i64::MAX), None), (20, i64::MAX));
        assert_eq!(page_bounds(Some(i64::MAX), Some(200)), (200, i64::MAX));
    }
}
