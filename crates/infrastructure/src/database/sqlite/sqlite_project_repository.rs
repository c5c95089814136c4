use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use scriptflow_domain::{Project, ProjectConfig, ProjectRepository};
use scriptflow_errors::ScriptFlowResult;

pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Project> {
        let config_json: String = row.try_get("config")?;
        let config: ProjectConfig = serde_json::from_str(&config_json).unwrap_or_default();
        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            config,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn upsert(&self, project: &Project) -> ScriptFlowResult<()> {
        let config_json = serde_json::to_string(&project.config)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, config, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (id) DO UPDATE SET name = ?2, config = ?3, updated = ?4
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&config_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_project).transpose()
    }

    async fn list(&self) -> ScriptFlowResult<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_project).collect()
    }
}
