//! 仓储接口
//!
//! 实体存储的异步访问契约。核心引擎只依赖这些 trait，
//! 具体实现（嵌入式 SQLite 或测试用内存仓储）由上层注入。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scriptflow_errors::ScriptFlowResult;

use crate::entities::{
    Channel, NewRun, Node, NodeStatus, Notification, Project, Run, RunOutcome, RunStatus,
    Subscription, Task,
};

/// 项目仓储
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn upsert(&self, project: &Project) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Project>>;

    async fn list(&self) -> ScriptFlowResult<Vec<Project>>;
}

/// 节点仓储
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn upsert(&self, node: &Node) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Node>>;

    async fn list(&self) -> ScriptFlowResult<Vec<Node>>;

    /// 更新节点可观测状态（仅在状态变化时调用）
    async fn update_status(&self, id: &str, status: NodeStatus) -> ScriptFlowResult<()>;
}

/// 任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn upsert(&self, task: &Task) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Task>>;

    async fn delete(&self, id: &str) -> ScriptFlowResult<()>;

    /// 所有 active=true 的任务
    async fn get_active_tasks(&self) -> ScriptFlowResult<Vec<Task>>;

    async fn get_by_project(&self, project_id: &str) -> ScriptFlowResult<Vec<Task>>;

    /// 连续失败计数写回
    async fn set_failure_count(&self, id: &str, count: i64) -> ScriptFlowResult<()>;
}

/// 运行记录仓储
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// 插入一条 status=started 的新记录，返回带 id 的完整记录
    async fn create(&self, run: &NewRun) -> ScriptFlowResult<Run>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Run>>;

    /// 终态写入。记录必须仍处于 started 状态，终态只会写一次。
    async fn set_outcome(&self, id: &str, outcome: &RunOutcome) -> ScriptFlowResult<()>;

    /// 把所有 started 记录标记为 interrupted（启动与退出时调用）
    async fn mark_started_as_interrupted(&self, message: &str) -> ScriptFlowResult<u64>;

    /// 每个任务最近一条运行记录，单条 join-and-max 查询
    async fn latest_by_tasks(&self, task_ids: &[String]) -> ScriptFlowResult<Vec<Run>>;

    /// 某任务在时间水位之后的最近 limit 条运行状态，按 created 倒序
    async fn recent_statuses(
        &self,
        task_id: &str,
        newer_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> ScriptFlowResult<Vec<RunStatus>>;

    /// 运行记录保留清理
    async fn delete_older_than(
        &self,
        task_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ScriptFlowResult<u64>;
}

/// 通道仓储
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn upsert(&self, channel: &Channel) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Channel>>;
}

/// 订阅仓储
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn upsert(&self, subscription: &Subscription) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Subscription>>;

    /// 匹配某次运行的订阅：active=true、task 一致、events 含运行状态。
    /// SQLite 实现通过 json_each(events) 成员连接完成。
    async fn matching_run(
        &self,
        task_id: &str,
        status: RunStatus,
    ) -> ScriptFlowResult<Vec<Subscription>>;

    /// 推进通知时间水位
    async fn set_notified(&self, id: &str, when: DateTime<Utc>) -> ScriptFlowResult<()>;
}

/// 通知仓储
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 插入 sent=false、error_count=0 的新通知行
    async fn create(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<Notification>;

    /// (订阅, 运行) 幂等保护：重复的运行更新事件不会产生重复通知
    async fn exists_for(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<bool>;

    /// 下一条待发送通知：sent=false 且 error_count<=max_error_count，最旧优先
    async fn next_unsent(&self, max_error_count: i64) -> ScriptFlowResult<Option<Notification>>;

    async fn mark_sent(&self, id: &str) -> ScriptFlowResult<()>;

    async fn bump_error_count(&self, id: &str) -> ScriptFlowResult<()>;

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Notification>>;
}
