use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use scriptflow_domain::{
    Channel, ChannelKind, EmailChannelConfig, Notification, Project, Run, SlackChannelConfig,
    Subscription, Task,
};
use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

use crate::context::ScriptFlow;
use crate::SEND_MAX_ERROR_COUNT;

use super::templates;

/// 邮件投递契约
///
/// SMTP 等具体传输在核心范围之外，进程启动时注入实现。
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> ScriptFlowResult<()>;
}

/// 未配置邮件传输时的占位实现，只记日志
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> ScriptFlowResult<()> {
        warn!(to, subject, "未配置邮件传输，通知仅记录日志");
        Ok(())
    }
}

/// 渲染模板时的消息上下文
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessageContext {
    pub header: String,
    pub subject: String,
    pub status: String,
    pub task_name: String,
    pub task_url: String,
    pub run_url: String,
    pub item: MessageItem,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessageItem {
    pub command: String,
    pub host: String,
    pub status: String,
    pub error: String,
    pub exit_code: String,
    pub created: String,
    pub updated: String,
}

/// 通知关联链：run → task → project，subscription → channel
struct NotificationContext {
    project: Project,
    task: Task,
    run: Run,
    subscription: Subscription,
    channel: Channel,
}

impl ScriptFlow {
    /// 周期投递作业：每轮取一条最旧的待发通知
    ///
    /// 发送成功置 sent=true；失败递增 error_count，超过上限后该通知
    /// 不再被选中（保持 sent=false 落库可查）。
    pub async fn job_send_notifications(&self) {
        let notification = match self
            .store
            .notifications
            .next_unsent(SEND_MAX_ERROR_COUNT)
            .await
        {
            Ok(Some(notification)) => notification,
            Ok(None) => return,
            Err(e) => {
                error!("查询待发通知失败: {e}");
                return;
            }
        };

        let context = match self.load_notification_context(&notification).await {
            Ok(context) => context,
            Err(e) => {
                error!(notification_id = %notification.id, "加载通知关联记录失败: {e}");
                if let Err(e) = self
                    .store
                    .notifications
                    .bump_error_count(&notification.id)
                    .await
                {
                    error!(notification_id = %notification.id, "更新通知错误计数失败: {e}");
                }
                return;
            }
        };

        match self.send_notification(&context).await {
            Ok(()) => {
                info!(notification_id = %notification.id, "通知已发送");
                if let Err(e) = self.store.notifications.mark_sent(&notification.id).await {
                    error!(notification_id = %notification.id, "标记通知已发送失败: {e}");
                }
            }
            Err(e) => {
                error!(notification_id = %notification.id, "发送通知失败: {e}");
                if let Err(e) = self
                    .store
                    .notifications
                    .bump_error_count(&notification.id)
                    .await
                {
                    error!(notification_id = %notification.id, "更新通知错误计数失败: {e}");
                }
            }
        }
    }

    async fn load_notification_context(
        &self,
        notification: &Notification,
    ) -> ScriptFlowResult<NotificationContext> {
        let run = self
            .store
            .runs
            .get_by_id(&notification.run)
            .await?
            .ok_or_else(|| ScriptFlowError::run_not_found(&notification.run))?;
        let task = self
            .store
            .tasks
            .get_by_id(&run.task)
            .await?
            .ok_or_else(|| ScriptFlowError::task_not_found(&run.task))?;
        let project = self
            .store
            .projects
            .get_by_id(&task.project)
            .await?
            .ok_or_else(|| {
                ScriptFlowError::internal(format!("项目未找到: {}", task.project))
            })?;
        let subscription = self
            .store
            .subscriptions
            .get_by_id(&notification.subscription)
            .await?
            .ok_or_else(|| {
                ScriptFlowError::internal(format!("订阅未找到: {}", notification.subscription))
            })?;
        let channel = self
            .store
            .channels
            .get_by_id(&subscription.channel)
            .await?
            .ok_or_else(|| {
                ScriptFlowError::internal(format!("通道未找到: {}", subscription.channel))
            })?;

        Ok(NotificationContext {
            project,
            task,
            run,
            subscription,
            channel,
        })
    }

    async fn send_notification(&self, context: &NotificationContext) -> ScriptFlowResult<()> {
        let mc = self.build_message_context(context);

        match context.channel.kind {
            ChannelKind::Email => {
                let config: EmailChannelConfig =
                    serde_json::from_value(context.channel.config.clone())?;
                let body = templates::render_email(&mc)?;
                self.mailer.send(&config.to, &mc.subject, &body).await
            }
            ChannelKind::Slack => {
                let config: SlackChannelConfig =
                    serde_json::from_value(context.channel.config.clone())?;
                let body = templates::render_slack(&mc)?;
                self.send_slack_message(&config, &body).await
            }
        }
    }

    /// slack 经 chat API 投递
    async fn send_slack_message(
        &self,
        config: &SlackChannelConfig,
        message: &str,
    ) -> ScriptFlowResult<()> {
        let response = self
            .http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&config.token)
            .json(&serde_json::json!({
                "channel": config.channel,
                "text": message,
            }))
            .send()
            .await
            .map_err(|e| ScriptFlowError::NotificationSend(format!("slack请求失败: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScriptFlowError::NotificationSend(format!("slack响应解析失败: {e}")))?;

        if body["ok"].as_bool() != Some(true) {
            let reason = body["error"].as_str().unwrap_or("unknown");
            return Err(ScriptFlowError::NotificationSend(format!(
                "slack拒绝消息: {reason}"
            )));
        }
        Ok(())
    }

    fn build_message_context(&self, context: &NotificationContext) -> MessageContext {
        let settings = self.config().settings.clone();
        let task_url = format!(
            "{}/#/{}/{}/history",
            settings.app_url, context.project.id, context.task.id
        );
        let run_url = format!(
            "{}/#/{}/{}/{}",
            settings.app_url, context.project.id, context.task.id, context.run.id
        );

        MessageContext {
            header: settings.app_name.clone(),
            subject: format!(
                "[{}] <{}> {}",
                settings.app_name, context.subscription.name, context.run.status
            ),
            status: context.run.status.to_string(),
            task_name: context.task.name.clone(),
            task_url,
            run_url,
            item: MessageItem {
                command: context.run.command.clone(),
                host: context.run.host.clone(),
                status: context.run.status.to_string(),
                error: context.run.connection_error.clone().unwrap_or_default(),
                exit_code: context
                    .run
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_default(),
                created: context.run.created.to_rfc3339(),
                updated: context.run.updated.to_rfc3339(),
            },
        }
    }
}
