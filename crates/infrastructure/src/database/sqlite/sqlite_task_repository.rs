use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use scriptflow_domain::{RecordEvent, Task, TaskRepository};
use scriptflow_errors::ScriptFlowResult;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool, events_tx: broadcast::Sender<RecordEvent>) -> Self {
        Self { pool, events_tx }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            command: row.try_get("command")?,
            schedule: row.try_get("schedule")?,
            node: row.try_get("node")?,
            project: row.try_get("project")?,
            active: row.try_get("active")?,
            prepend_datetime: row.try_get("prepend_datetime")?,
            consecutive_failure_count: row.try_get("consecutive_failure_count")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn upsert(&self, task: &Task) -> ScriptFlowResult<()> {
        let existing = self.get_by_id(&task.id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, command, schedule, node, project, active, prepend_datetime,
                 consecutive_failure_count, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)
            ON CONFLICT (id) DO UPDATE SET
                name = ?2, command = ?3, schedule = ?4, node = ?5, project = ?6,
                active = ?7, prepend_datetime = ?8, updated = ?9
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.command)
        .bind(&task.schedule)
        .bind(&task.node)
        .bind(&task.project)
        .bind(task.active)
        .bind(task.prepend_datetime)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if let Some(saved) = self.get_by_id(&task.id).await? {
            let event = if existing.is_some() {
                RecordEvent::TaskUpdated { task: saved }
            } else {
                RecordEvent::TaskCreated { task: saved }
            };
            let _ = self.events_tx.send(event);
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn delete(&self, id: &str) -> ScriptFlowResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            let _ = self.events_tx.send(RecordEvent::TaskDeleted {
                task_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_active_tasks(&self) -> ScriptFlowResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE active = 1 ORDER BY created")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_project(&self, project_id: &str) -> ScriptFlowResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE project = ?1 ORDER BY created")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn set_failure_count(&self, id: &str, count: i64) -> ScriptFlowResult<()> {
        // 失败计数回写不发事件，避免与任务更新钩子形成回环
        sqlx::query("UPDATE tasks SET consecutive_failure_count = ?1, updated = ?2 WHERE id = ?3")
            .bind(count)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
