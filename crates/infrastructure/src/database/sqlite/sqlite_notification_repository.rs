use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use scriptflow_domain::{Notification, NotificationRepository};
use scriptflow_errors::ScriptFlowResult;

use crate::database::new_record_id;

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Notification> {
        Ok(Notification {
            id: row.try_get("id")?,
            subscription: row.try_get("subscription")?,
            run: row.try_get("run")?,
            sent: row.try_get("sent")?,
            error_count: row.try_get("error_count")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn create(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<Notification> {
        let id = new_record_id();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, subscription, run, sent, error_count, created, updated)
            VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
            "#,
        )
        .bind(&id)
        .bind(subscription_id)
        .bind(run_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Notification {
            id,
            subscription: subscription_id.to_string(),
            run: run_id.to_string(),
            sent: false,
            error_count: 0,
            created: now,
            updated: now,
        })
    }

    async fn exists_for(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM notifications WHERE subscription = ?1 AND run = ?2",
        )
        .bind(subscription_id)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("cnt")?;
        Ok(count > 0)
    }

    async fn next_unsent(&self, max_error_count: i64) -> ScriptFlowResult<Option<Notification>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE sent = 0 AND error_count <= ?1
            ORDER BY updated
            LIMIT 1
            "#,
        )
        .bind(max_error_count)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_notification).transpose()
    }

    async fn mark_sent(&self, id: &str) -> ScriptFlowResult<()> {
        sqlx::query("UPDATE notifications SET sent = 1, updated = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bump_error_count(&self, id: &str) -> ScriptFlowResult<()> {
        sqlx::query(
            "UPDATE notifications SET error_count = error_count + 1, updated = ?1 WHERE id = ?2",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Notification>> {
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_notification).transpose()
    }
}
