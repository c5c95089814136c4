use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use scriptflow_domain::{Channel, ChannelRepository};
use scriptflow_errors::ScriptFlowResult;

pub struct SqliteChannelRepository {
    pool: SqlitePool,
}

impl SqliteChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Channel> {
        let config_json: String = row.try_get("config")?;
        Ok(Channel {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: row.try_get("type")?,
            config: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl ChannelRepository for SqliteChannelRepository {
    async fn upsert(&self, channel: &Channel) -> ScriptFlowResult<()> {
        let config_json = serde_json::to_string(&channel.config)?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO channels (id, name, type, config, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (id) DO UPDATE SET name = ?2, type = ?3, config = ?4, updated = ?5
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(channel.kind)
        .bind(&config_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_channel).transpose()
    }
}
