//! Catalog item model: the single source of truth for copy availability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Catalog item with its lendable copy counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CatalogItem {
    pub id: i32,
    pub title: String,
    pub total_copies: i32,
    /// Always within `0..=total_copies`
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Copies currently out on loan
    pub fn copies_on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    pub fn bounds_hold(&self) -> bool {
        self.available_copies >= 0 && self.available_copies <= self.total_copies
    }
}

/// Create catalog item request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCatalogItem {
    #[validate(length(min = 1, max = 500, message = "Title must be 1 to 500 characters"))]
    pub title: String,
    #[validate(range(min = 0, message = "Total copies cannot be negative"))]
    pub total_copies: i32,
}

/// Change the number of copies the library owns
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCopies {
    #[validate(range(min = 0, message = "Total copies cannot be negative"))]
    pub total_copies: i32,
}

/// Catalog listing parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct CatalogItemQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
