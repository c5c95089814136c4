//! 触发引擎
//!
//! 调度库抽象层：支持 cron 表达式与带抖动的固定间隔触发、按 id 原地更新、
//! 标签枚举，以及单例防重叠模式：上一轮执行未结束时，本次触发被丢弃并
//! 顺延到下一个时间槽。
//!
//! 每个作业是一个独立的 tokio 循环任务，通过取消令牌停止；
//! 引擎关闭时级联取消全部作业。

mod job;

pub use job::{Engine, EngineError, Job, JobDefinition, JobTask};
