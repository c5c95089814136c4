//! ScriptFlow 核心引擎
//!
//! 调度与分发、运行执行管道、两阶段对账、记录事件路由、系统作业与
//! 通知管道。所有组件围绕一个进程级 [`ScriptFlow`] 上下文组织，
//! 依赖（存储、SSH 池、触发引擎、日志目录）在启动时注入。

mod context;
mod events;
mod executor;
mod jobs;
mod notification;
mod reconcile;
mod schedule;
mod sync;

pub use context::ScriptFlow;
pub use notification::{Mailer, NoopMailer};
pub use schedule::{duration_min_max, resolve_hashed_schedule};

/// 系统作业共用标签，区分用户任务触发器
pub const SYSTEM_TASK: &str = "system-task";

pub const JOB_CHECK_NODE_STATUS: &str = "check-node-status";
pub const JOB_SEND_NOTIFICATIONS: &str = "send-notifications";
pub const JOB_REMOVE_OUTDATED_LOGS: &str = "remove-outdated-logs";
pub const JOB_REMOVE_OUTDATED_RECORDS: &str = "remove-outdated-records";
pub const JOB_RECONCILE_JOBS: &str = "reconcile-jobs";

/// 通知发送失败的重试上限，超过后不再投递
pub const SEND_MAX_ERROR_COUNT: i64 = 3;
