//! 实体存储契约
//!
//! 核心引擎消费的存储视图：按实体分组的仓储句柄加一条记录变更事件广播。
//! 具体由嵌入式 SQLite 实现或测试用内存实现组装。

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::RecordEvent;
use crate::repositories::{
    ChannelRepository, NodeRepository, NotificationRepository, ProjectRepository, RunRepository,
    SubscriptionRepository, TaskRepository,
};

/// 实体存储句柄
#[derive(Clone)]
pub struct EntityStore {
    pub projects: Arc<dyn ProjectRepository>,
    pub nodes: Arc<dyn NodeRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl EntityStore {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        nodes: Arc<dyn NodeRepository>,
        tasks: Arc<dyn TaskRepository>,
        runs: Arc<dyn RunRepository>,
        channels: Arc<dyn ChannelRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifications: Arc<dyn NotificationRepository>,
        events_tx: broadcast::Sender<RecordEvent>,
    ) -> Self {
        Self {
            projects,
            nodes,
            tasks,
            runs,
            channels,
            subscriptions,
            notifications,
            events_tx,
        }
    }

    /// 订阅记录变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events_tx.subscribe()
    }
}
