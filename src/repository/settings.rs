//! System configuration (key/value) repository

use sqlx::{Pool, Postgres, Row};

use crate::error::AppResult;

#[derive(Clone)]
pub struct SettingsRepository {
    pool: Pool<Postgres>,
}

impl SettingsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// All stored key/value pairs
    pub async fn get_all(&self) -> AppResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM system_config ORDER BY key")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();
        Ok(rows)
    }

    /// Insert or replace a batch of values atomically
    pub async fn upsert_many(&self, values: &[(&str, String)], updated_by: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in values {
            sqlx::query(
                r#"
                INSERT INTO system_config (key, value, updated_by, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by, updated_at = NOW()
                "#,
            )
            .bind(*key)
            .bind(value)
            .bind(updated_by)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
