//! In-app notifications repository

use sqlx::{Pool, Postgres};

use crate::{error::AppResult, models::Notification};

#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Pool<Postgres>,
}

impl NotificationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Store a notification in the recipient's inbox
    pub async fn create(&self, notification: &Notification) -> AppResult<i32> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO notifications (user_id, item_id, kind, message)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(notification.recipient_id)
        .bind(notification.item_id)
        .bind(notification.kind.as_str())
        .bind(&notification.message)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// E-mail address of a user, as registered with the identity provider
    pub async fn recipient_email(&self, user_id: i32) -> AppResult<Option<String>> {
        let email = sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(email)
    }
}
