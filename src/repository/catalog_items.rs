//! Catalog items repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        catalog_item::{CatalogItem, CatalogItemQuery, CreateCatalogItem},
        page_bounds,
    },
};

#[derive(Clone)]
pub struct CatalogItemsRepository {
    pool: Pool<Postgres>,
}

impl CatalogItemsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get catalog item by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<CatalogItem> {
        sqlx::query_as::<_, CatalogItem>("SELECT * FROM catalog_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Catalog item with id {} not found", id)))
    }

    /// List catalog items, oldest first
    pub async fn list(&self, query: &CatalogItemQuery) -> AppResult<(Vec<CatalogItem>, i64)> {
        let (limit, offset) = page_bounds(query.page, query.per_page);

        let items = sqlx::query_as::<_, CatalogItem>(
            "SELECT * FROM catalog_items ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_items")
            .fetch_one(&self.pool)
            .await?;

        Ok((items, total))
    }

    /// Create a catalog item with every copy available
    pub async fn create(&self, item: &CreateCatalogItem, now: DateTime<Utc>) -> AppResult<CatalogItem> {
        let created = sqlx::query_as::<_, CatalogItem>(
            r#"
            INSERT INTO catalog_items (title, total_copies, available_copies, created_at, updated_at)
            VALUES ($1, $2, $2, $3, $3)
            RETURNING *
            "#,
        )
        .bind(&item.title)
        .bind(item.total_copies)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}

/// Lock the item row for the rest of the transaction
pub async fn lock_for_update(conn: &mut PgConnection, id: i32) -> AppResult<CatalogItem> {
    sqlx::query_as::<_, CatalogItem>("SELECT * FROM catalog_items WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Catalog item with id {} not found", id)))
}

/// Write both copy counters of a locked item
pub async fn write_copies(
    conn: &mut PgConnection,
    id: i32,
    total_copies: i32,
    available_copies: i32,
    now: DateTime<Utc>,
) -> AppResult<CatalogItem> {
    let item = sqlx::query_as::<_, CatalogItem>(
        r#"
        UPDATE catalog_items
        SET total_copies = $2, available_copies = $3, updated_at = $4
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(total_copies)
    .bind(available_copies)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(item)
}

/// Delete a locked item; loans and reservations cascade
pub async fn delete(conn: &mut PgConnection, id: i32) -> AppResult<()> {
    sqlx::query("DELETE FROM catalog_items WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
