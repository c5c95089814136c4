//! SQLite 实体存储
//!
//! 每个实体一个仓储，连接池与迁移集中在 Store 中初始化。
//! 仓储在成功写入后通过广播通道发出记录变更事件；批量修正类写入
//! （标记中断、推进水位、状态探测回写）不发事件。

mod sqlite_channel_repository;
mod sqlite_node_repository;
mod sqlite_notification_repository;
mod sqlite_project_repository;
mod sqlite_run_repository;
mod sqlite_subscription_repository;
mod sqlite_task_repository;

pub use sqlite_channel_repository::SqliteChannelRepository;
pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_notification_repository::SqliteNotificationRepository;
pub use sqlite_project_repository::SqliteProjectRepository;
pub use sqlite_run_repository::SqliteRunRepository;
pub use sqlite_subscription_repository::SqliteSubscriptionRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;

use scriptflow_domain::{EntityStore, RecordEvent};
use scriptflow_errors::ScriptFlowResult;

/// 记录变更事件的广播容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 嵌入式 SQLite 存储
pub struct Store {
    pool: SqlitePool,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl Store {
    /// 打开数据库文件，不存在时创建，并执行迁移
    pub async fn open(database_path: &str) -> ScriptFlowResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_path)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::from_pool(pool).await
    }

    /// 内存数据库，测试用
    pub async fn open_in_memory() -> ScriptFlowResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> ScriptFlowResult<Self> {
        run_migrations(&pool).await?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { pool, events_tx })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events_tx.subscribe()
    }

    /// 组装核心引擎消费的实体存储句柄
    pub fn entity_store(&self) -> EntityStore {
        EntityStore::new(
            Arc::new(SqliteProjectRepository::new(self.pool.clone())),
            Arc::new(SqliteNodeRepository::new(
                self.pool.clone(),
                self.events_tx.clone(),
            )),
            Arc::new(SqliteTaskRepository::new(
                self.pool.clone(),
                self.events_tx.clone(),
            )),
            Arc::new(SqliteRunRepository::new(
                self.pool.clone(),
                self.events_tx.clone(),
            )),
            Arc::new(SqliteChannelRepository::new(self.pool.clone())),
            Arc::new(SqliteSubscriptionRepository::new(self.pool.clone())),
            Arc::new(SqliteNotificationRepository::new(self.pool.clone())),
            self.events_tx.clone(),
        )
    }
}

/// 执行数据库迁移
async fn run_migrations(pool: &SqlitePool) -> ScriptFlowResult<()> {
    debug!("执行SQLite数据库迁移");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            host TEXT NOT NULL,
            username TEXT NOT NULL,
            private_key TEXT,
            status TEXT NOT NULL DEFAULT 'offline',
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            command TEXT NOT NULL,
            schedule TEXT NOT NULL,
            node TEXT NOT NULL,
            project TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            prepend_datetime INTEGER NOT NULL DEFAULT 0,
            consecutive_failure_count INTEGER NOT NULL DEFAULT 0,
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            task TEXT NOT NULL,
            host TEXT NOT NULL,
            command TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'started',
            exit_code INTEGER,
            connection_error TEXT,
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            task TEXT NOT NULL,
            channel TEXT NOT NULL,
            events TEXT NOT NULL DEFAULT '[]',
            threshold INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 0,
            notified DATETIME,
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            subscription TEXT NOT NULL,
            run TEXT NOT NULL,
            sent INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            created DATETIME NOT NULL,
            updated DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks(active)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project)",
        "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)",
        "CREATE INDEX IF NOT EXISTS idx_runs_task_created ON runs(task, created)",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_task ON subscriptions(task)",
        "CREATE INDEX IF NOT EXISTS idx_notifications_sent ON notifications(sent, error_count)",
    ];
    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("SQLite数据库迁移完成");
    Ok(())
}
