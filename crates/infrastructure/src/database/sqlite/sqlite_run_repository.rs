use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::warn;

use scriptflow_domain::{NewRun, RecordEvent, Run, RunOutcome, RunRepository, RunStatus};
use scriptflow_errors::ScriptFlowResult;

use crate::database::new_record_id;

pub struct SqliteRunRepository {
    pool: SqlitePool,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool, events_tx: broadcast::Sender<RecordEvent>) -> Self {
        Self { pool, events_tx }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Run> {
        Ok(Run {
            id: row.try_get("id")?,
            task: row.try_get("task")?,
            host: row.try_get("host")?,
            command: row.try_get("command")?,
            status: row.try_get("status")?,
            exit_code: row.try_get("exit_code")?,
            connection_error: row.try_get("connection_error")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn create(&self, run: &NewRun) -> ScriptFlowResult<Run> {
        let id = new_record_id();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO runs (id, task, host, command, status, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&run.task)
        .bind(&run.host)
        .bind(&run.command)
        .bind(RunStatus::Started)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = Run {
            id,
            task: run.task.clone(),
            host: run.host.clone(),
            command: run.command.clone(),
            status: RunStatus::Started,
            exit_code: None,
            connection_error: None,
            created: now,
            updated: now,
        };
        let _ = self.events_tx.send(RecordEvent::RunCreated {
            run: created.clone(),
        });
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn set_outcome(&self, id: &str, outcome: &RunOutcome) -> ScriptFlowResult<()> {
        // 只允许从 started 迁移，终态恰好写一次
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?1, exit_code = ?2, connection_error = ?3, updated = ?4
            WHERE id = ?5 AND status = 'started'
            "#,
        )
        .bind(outcome.status)
        .bind(outcome.exit_code)
        .bind(&outcome.connection_error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(run_id = id, status = %outcome.status, "运行记录已是终态，忽略本次写入");
            return Ok(());
        }

        if let Some(updated) = self.get_by_id(id).await? {
            let _ = self.events_tx.send(RecordEvent::RunUpdated { run: updated });
        }
        Ok(())
    }

    async fn mark_started_as_interrupted(&self, message: &str) -> ScriptFlowResult<u64> {
        // 批量修正，不发事件
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'interrupted', connection_error = ?1, updated = ?2
            WHERE status = 'started'
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn latest_by_tasks(&self, task_ids: &[String]) -> ScriptFlowResult<Vec<Run>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..task_ids.len())
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            r#"
            SELECT r.* FROM runs r
            INNER JOIN (
                SELECT task, MAX(created) AS max_created FROM runs
                WHERE task IN ({placeholders})
                GROUP BY task
            ) latest ON r.task = latest.task AND r.created = latest.max_created
            "#
        );
        let mut query = sqlx::query(&sql);
        for task_id in task_ids {
            query = query.bind(task_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn recent_statuses(
        &self,
        task_id: &str,
        newer_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> ScriptFlowResult<Vec<RunStatus>> {
        let watermark = newer_than.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let rows = sqlx::query(
            r#"
            SELECT status FROM runs
            WHERE task = ?1 AND created > ?2
            ORDER BY created DESC
            LIMIT ?3
            "#,
        )
        .bind(task_id)
        .bind(watermark)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<RunStatus, _>("status")?))
            .collect()
    }

    async fn delete_older_than(
        &self,
        task_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ScriptFlowResult<u64> {
        let result = sqlx::query("DELETE FROM runs WHERE task = ?1 AND created < ?2")
            .bind(task_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
