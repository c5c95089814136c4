use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use scriptflow_domain::{Node, NodeRepository, NodeStatus, RecordEvent};
use scriptflow_errors::ScriptFlowResult;

pub struct SqliteNodeRepository {
    pool: SqlitePool,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool, events_tx: broadcast::Sender<RecordEvent>) -> Self {
        Self { pool, events_tx }
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> ScriptFlowResult<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            host: row.try_get("host")?,
            username: row.try_get("username")?,
            private_key: row.try_get("private_key")?,
            status: row.try_get("status")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
        })
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn upsert(&self, node: &Node) -> ScriptFlowResult<()> {
        let existing = self.get_by_id(&node.id).await?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO nodes (id, host, username, private_key, status, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (id) DO UPDATE SET
                host = ?2, username = ?3, private_key = ?4, updated = ?6
            "#,
        )
        .bind(&node.id)
        .bind(&node.host)
        .bind(&node.username)
        .bind(&node.private_key)
        .bind(node.status)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // 已有节点的连接参数可能已变化，通知路由驱逐其SSH会话
        if existing.is_some() {
            if let Some(updated) = self.get_by_id(&node.id).await? {
                let _ = self.events_tx.send(RecordEvent::NodeUpdated { node: updated });
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn list(&self) -> ScriptFlowResult<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY created")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn update_status(&self, id: &str, status: NodeStatus) -> ScriptFlowResult<()> {
        // 探测回写不发事件，避免与状态探测形成回环
        sqlx::query("UPDATE nodes SET status = ?1, updated = ?2 WHERE id = ?3")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
