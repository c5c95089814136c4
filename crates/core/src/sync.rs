use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use scriptflow_config::{generate_id_from_name, is_valid_id, load_config, Config};
use scriptflow_domain::{
    Channel, ChannelKind, Node, NodeStatus, Project, ProjectConfig, RunStatus, Subscription, Task,
};
use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

use crate::context::ScriptFlow;

impl ScriptFlow {
    /// 重载配置
    ///
    /// 全程持重载锁串行。解析新配置 → 换指针 → 同步存储（失败回滚指针）→
    /// 重新调度活跃任务 → 立即对账。
    pub async fn reload(self: &Arc<Self>) -> ScriptFlowResult<()> {
        let _guard = self.reload_lock.lock().await;
        info!("开始重载配置");

        let Some(config_file_path) = &self.config_file_path else {
            info!("没有配置文件，跳过重载");
            return Ok(());
        };

        let new_config = load_config(config_file_path)
            .map_err(|e| ScriptFlowError::config_error(format!("加载新配置失败: {e}")))?;

        let old_config = {
            let mut config = self.config.write().unwrap();
            std::mem::replace(&mut *config, Arc::new(new_config))
        };

        if let Err(e) = self.update_from_config().await {
            // 回滚配置指针
            *self.config.write().unwrap() = old_config;
            return Err(ScriptFlowError::config_error(format!(
                "从配置同步存储失败，已回滚: {e}"
            )));
        }

        self.schedule_active_tasks().await;
        self.reconcile_jobs().await;

        info!("配置重载成功");
        Ok(())
    }

    /// 按配置文件逐节插入或更新存储记录
    ///
    /// 字段缺失或 id 非法的条目记警告跳过，不影响其余条目。
    pub async fn update_from_config(&self) -> ScriptFlowResult<()> {
        let config = self.config();
        self.sync_projects(&config).await;
        self.sync_nodes(&config).await;
        self.sync_tasks(&config).await;
        self.sync_channels(&config).await;
        self.sync_subscriptions(&config).await;
        Ok(())
    }

    async fn sync_projects(&self, config: &Config) {
        for project in &config.projects {
            if project.name.is_empty() {
                warn!("[config] 项目名称为空，跳过");
                continue;
            }
            let id = if project.id.is_empty() {
                generate_id_from_name(&project.name)
            } else {
                project.id.clone()
            };
            if !is_valid_id(&id) {
                warn!(id, "[config] 项目id非法，跳过");
                continue;
            }
            let now = Utc::now();
            let record = Project {
                id,
                name: project.name.clone(),
                config: ProjectConfig {
                    logs_max_days: project.config.logs_max_days,
                },
                created: now,
                updated: now,
            };
            if let Err(e) = self.store.projects.upsert(&record).await {
                error!("[config] 写入项目失败: {e}");
            }
        }
    }

    async fn sync_nodes(&self, config: &Config) {
        for node in &config.nodes {
            if node.host.is_empty() || node.username.is_empty() {
                warn!("[config] 节点主机或用户名为空，跳过");
                continue;
            }
            let id = if node.id.is_empty() {
                generate_id_from_name(&format!("{}-{}", node.host, node.username))
            } else {
                node.id.clone()
            };
            if !is_valid_id(&id) {
                warn!(id, "[config] 节点id非法，跳过");
                continue;
            }
            let now = Utc::now();
            let record = Node {
                id,
                host: node.host.clone(),
                username: node.username.clone(),
                private_key: node.private_key.clone(),
                status: NodeStatus::Offline,
                created: now,
                updated: now,
            };
            if let Err(e) = self.store.nodes.upsert(&record).await {
                error!("[config] 写入节点失败: {e}");
            }
        }
    }

    async fn sync_tasks(&self, config: &Config) {
        for task in &config.tasks {
            if task.name.is_empty()
                || task.command.is_empty()
                || task.schedule.is_empty()
                || task.node.is_empty()
                || task.project.is_empty()
            {
                warn!("[config] 任务字段不完整，跳过");
                continue;
            }
            let id = if task.id.is_empty() {
                generate_id_from_name(&task.name)
            } else {
                task.id.clone()
            };
            if !is_valid_id(&id) {
                warn!(id, "[config] 任务id非法，跳过");
                continue;
            }
            let now = Utc::now();
            let record = Task {
                id,
                name: task.name.clone(),
                command: task.command.clone(),
                schedule: task.schedule.clone(),
                node: task.node.clone(),
                project: task.project.clone(),
                active: task.active,
                prepend_datetime: task.prepend_datetime,
                consecutive_failure_count: 0,
                created: now,
                updated: now,
            };
            if let Err(e) = self.store.tasks.upsert(&record).await {
                error!("[config] 写入任务失败: {e}");
            }
        }
    }

    async fn sync_channels(&self, config: &Config) {
        for channel in &config.channels {
            if channel.name.is_empty() || channel.kind.is_empty() {
                warn!("[config] 通道名称或类型为空，跳过");
                continue;
            }
            let Some(kind) = ChannelKind::parse(&channel.kind) else {
                warn!(kind = %channel.kind, "[config] 不支持的通道类型，跳过");
                continue;
            };
            let id = if channel.id.is_empty() {
                generate_id_from_name(&channel.name)
            } else {
                channel.id.clone()
            };
            if !is_valid_id(&id) {
                warn!(id, "[config] 通道id非法，跳过");
                continue;
            }
            let config_value = match serde_json::to_value(&channel.config) {
                Ok(value) => value,
                Err(e) => {
                    error!("[config] 序列化通道配置失败: {e}");
                    continue;
                }
            };
            let now = Utc::now();
            let record = Channel {
                id,
                name: channel.name.clone(),
                kind,
                config: config_value,
                created: now,
                updated: now,
            };
            if let Err(e) = self.store.channels.upsert(&record).await {
                error!("[config] 写入通道失败: {e}");
            }
        }
    }

    async fn sync_subscriptions(&self, config: &Config) {
        for subscription in &config.subscriptions {
            if subscription.name.is_empty()
                || subscription.channel.is_empty()
                || subscription.task.is_empty()
            {
                warn!("[config] 订阅字段不完整，跳过");
                continue;
            }
            if subscription.events.is_empty() {
                warn!(name = %subscription.name, "[config] 订阅事件集为空，跳过");
                continue;
            }
            // 过滤掉未知的运行状态
            let events: Vec<RunStatus> = subscription
                .events
                .iter()
                .filter_map(|event| RunStatus::parse(event))
                .collect();
            if events.is_empty() {
                warn!(name = %subscription.name, "[config] 订阅事件集没有合法状态，跳过");
                continue;
            }

            let id = if subscription.id.is_empty() {
                generate_id_from_name(&subscription.name)
            } else {
                subscription.id.clone()
            };
            let now = Utc::now();
            let record = Subscription {
                id,
                name: subscription.name.clone(),
                task: subscription.task.clone(),
                channel: subscription.channel.clone(),
                events,
                threshold: subscription.threshold,
                active: subscription.active,
                notified: None,
                created: now,
                updated: now,
            };
            if let Err(e) = self.store.subscriptions.upsert(&record).await {
                error!("[config] 写入订阅失败: {e}");
            }
        }
    }
}
