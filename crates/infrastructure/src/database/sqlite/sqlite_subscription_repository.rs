use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use scriptflow_domain::{RunStatus, Subscription, SubscriptionRepository};
use scriptflow_errors::ScriptFlowResult;

pub struct SqliteSubscriptionRepository {
    pool: SqlitePool,
}

impl SqliteSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Subscription> {
        let events_json: String = row.try_get("events")?;
        let event_names: Vec<String> = serde_json::from_str(&events_json).unwrap_or_default();
        let events = event_names
            .iter()
            .filter_map(|name| RunStatus::parse(name))
            .collect();
        Ok(Subscription {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task: row.try_get("task")?,
            channel: row.try_get("channel")?,
            events,
            threshold: row.try_get("threshold")?,
            active: row.try_get("active")?,
            notified: row.try_get("notified")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl SubscriptionRepository for SqliteSubscriptionRepository {
    async fn upsert(&self, subscription: &Subscription) -> ScriptFlowResult<()> {
        let event_names: Vec<&str> = subscription.events.iter().map(|e| e.as_str()).collect();
        let events_json = serde_json::to_string(&event_names)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, name, task, channel, events, threshold, active, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (id) DO UPDATE SET
                name = ?2, task = ?3, channel = ?4, events = ?5, threshold = ?6,
                active = ?7, updated = ?8
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.task)
        .bind(&subscription.channel)
        .bind(&events_json)
        .bind(subscription.threshold)
        .bind(subscription.active)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_subscription).transpose()
    }

    async fn matching_run(
        &self,
        task_id: &str,
        status: RunStatus,
    ) -> ScriptFlowResult<Vec<Subscription>> {
        // events 是 JSON 数组字段，用 json_each 做成员连接
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT s.* FROM subscriptions s
            JOIN json_each(s.events) AS je ON je.value = ?1
            WHERE s.active = 1 AND s.task = ?2
            "#,
        )
        .bind(status.as_str())
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_subscription).collect()
    }

    async fn set_notified(&self, id: &str, when: DateTime<Utc>) -> ScriptFlowResult<()> {
        sqlx::query("UPDATE subscriptions SET notified = ?1, updated = ?2 WHERE id = ?3")
            .bind(when)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
