//! 通知管道
//!
//! 第一阶段在运行记录创建/更新时评估订阅并落通知行；
//! 第二阶段由周期作业投递，失败计数封顶后不再重试。

mod send;
mod templates;

pub use send::{Mailer, NoopMailer};

use chrono::Utc;
use tracing::{debug, error};

use scriptflow_domain::{Run, RunStatus, Subscription};

use crate::context::ScriptFlow;

impl ScriptFlow {
    /// 运行记录创建/更新钩子：按订阅评估是否落通知行
    ///
    /// threshold < 2 直接创建；否则统计 notified 水位之后最近
    /// threshold 条运行中命中事件集的数量，够数才创建。
    pub async fn process_run_notification(&self, run: &Run) {
        let subscriptions = match self
            .store
            .subscriptions
            .matching_run(&run.task, run.status)
            .await
        {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(run_id = %run.id, "查询匹配订阅失败: {e}");
                return;
            }
        };

        for subscription in subscriptions {
            if !subscription.active {
                continue;
            }
            debug!(subscription_id = %subscription.id, run_id = %run.id, "评估订阅");

            if subscription.threshold < 2 {
                self.create_notification(&subscription, run).await;
                continue;
            }

            let consecutive_count = match self.consecutive_runs_count(&subscription).await {
                Ok(count) => count,
                Err(e) => {
                    error!(subscription_id = %subscription.id, "统计最近运行失败: {e}");
                    continue;
                }
            };

            if consecutive_count >= subscription.threshold {
                self.create_notification(&subscription, run).await;
            }
        }
    }

    /// notified 水位之后最近 threshold 条运行中，状态命中事件集的数量
    async fn consecutive_runs_count(
        &self,
        subscription: &Subscription,
    ) -> scriptflow_errors::ScriptFlowResult<i64> {
        let statuses = self
            .store
            .runs
            .recent_statuses(
                &subscription.task,
                subscription.notified,
                subscription.threshold,
            )
            .await?;
        Ok(statuses
            .iter()
            .filter(|status| subscription.matches(**status))
            .count() as i64)
    }

    async fn create_notification(&self, subscription: &Subscription, run: &Run) {
        // (订阅, 运行) 幂等保护：重复的更新事件不会落重复行
        match self
            .store
            .notifications
            .exists_for(&subscription.id, &run.id)
            .await
        {
            Ok(true) => {
                debug!(subscription_id = %subscription.id, run_id = %run.id, "通知已存在，跳过");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(subscription_id = %subscription.id, "查询通知是否存在失败: {e}");
                return;
            }
        }

        debug!(subscription_id = %subscription.id, run_id = %run.id, "创建通知");
        if let Err(e) = self
            .store
            .notifications
            .create(&subscription.id, &run.id)
            .await
        {
            error!(subscription_id = %subscription.id, "创建通知失败: {e}");
            return;
        }

        // 推进水位，下一轮评估只看更新的运行
        if let Err(e) = self
            .store
            .subscriptions
            .set_notified(&subscription.id, Utc::now())
            .await
        {
            error!(subscription_id = %subscription.id, "更新订阅通知水位失败: {e}");
        }
    }

    /// 运行更新钩子：维护任务连续失败计数
    ///
    /// completed 清零，error/internal_error 递增，其余状态不动。
    pub async fn update_task_failure_count(&self, run: &Run) {
        let delta = match run.status {
            RunStatus::Completed => Some(0),
            RunStatus::Error | RunStatus::InternalError => None,
            _ => return,
        };

        let task = match self.store.tasks.get_by_id(&run.task).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_id = %run.task, "失败计数更新时任务已不存在");
                return;
            }
            Err(e) => {
                error!(task_id = %run.task, "加载任务失败: {e}");
                return;
            }
        };

        let new_count = match delta {
            Some(reset) => {
                if task.consecutive_failure_count == reset {
                    return;
                }
                reset
            }
            None => task.consecutive_failure_count + 1,
        };

        if let Err(e) = self
            .store
            .tasks
            .set_failure_count(&task.id, new_count)
            .await
        {
            error!(task_id = %task.id, "写回连续失败计数失败: {e}");
        }
    }
}
