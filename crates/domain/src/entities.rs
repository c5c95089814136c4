//! 领域实体
//!
//! 项目、节点、任务、运行记录、通知通道、订阅与通知等核心业务模型。
//! 这些实体与存储实现解耦，仅依赖 serde/chrono/sqlx 的类型支持。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 项目配置中日志保留天数的默认值
pub const DEFAULT_LOGS_MAX_DAYS: i64 = 90;

// ============================================================================
// 项目
// ============================================================================

/// 项目
///
/// 任务的分组单位，携带保留策略等配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub config: ProjectConfig,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// 项目配置（存储为 JSON 字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(rename = "logsMaxDays", skip_serializing_if = "Option::is_none")]
    pub logs_max_days: Option<i64>,
}

impl Project {
    /// 日志与运行记录的保留天数，未配置时取默认值
    pub fn retention_days(&self) -> i64 {
        self.config.logs_max_days.unwrap_or(DEFAULT_LOGS_MAX_DAYS)
    }
}

// ============================================================================
// 节点
// ============================================================================

/// 远程节点，通过 SSH 可达
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub host: String,
    pub username: String,
    /// 私钥路径，为空时使用进程级默认私钥
    pub private_key: Option<String>,
    pub status: NodeStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// 节点可观测状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "offline")]
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for NodeStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for NodeStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            _ => Err(format!("Invalid node status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for NodeStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl Node {
    pub fn is_online(&self) -> bool {
        matches!(self.status, NodeStatus::Online)
    }
}

// ============================================================================
// 任务
// ============================================================================

/// 任务定义
///
/// 一条 (命令, 调度表达式, 节点) 三元组，绑定到某个项目。
/// `schedule` 支持五段 cron（含 Jenkins 风格 H 记号）或 `@every <duration>`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub command: String,
    pub schedule: String,
    pub node: String,
    pub project: String,
    pub active: bool,
    pub prepend_datetime: bool,
    /// 连续失败次数，completed 清零，error/internal_error 递增
    pub consecutive_failure_count: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

// ============================================================================
// 运行记录
// ============================================================================

/// 一次任务执行尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task: String,
    pub host: String,
    pub command: String,
    pub status: RunStatus,
    pub exit_code: Option<i64>,
    pub connection_error: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// 待插入的运行记录（id 与时间戳由存储生成，初始状态恒为 started）
#[derive(Debug, Clone)]
pub struct NewRun {
    pub task: String,
    pub host: String,
    pub command: String,
}

/// 终态写入：status 与相关字段一次性落库
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub exit_code: Option<i64>,
    pub connection_error: Option<String>,
}

impl RunOutcome {
    pub fn completed(exit_code: i64) -> Self {
        Self {
            status: RunStatus::Completed,
            exit_code: Some(exit_code),
            connection_error: None,
        }
    }

    pub fn error(exit_code: Option<i64>) -> Self {
        Self {
            status: RunStatus::Error,
            exit_code,
            connection_error: None,
        }
    }

    pub fn interrupted<S: Into<String>>(connection_error: S) -> Self {
        Self {
            status: RunStatus::Interrupted,
            exit_code: None,
            connection_error: Some(connection_error.into()),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: RunStatus::InternalError,
            exit_code: None,
            connection_error: None,
        }
    }

    pub fn killed() -> Self {
        Self {
            status: RunStatus::Killed,
            exit_code: None,
            connection_error: None,
        }
    }
}

/// 运行状态，started 是唯一的非终态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunStatus {
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "interrupted")]
    Interrupted,
    #[serde(rename = "internal_error")]
    InternalError,
    #[serde(rename = "killed")]
    Killed,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Started,
        RunStatus::Completed,
        RunStatus::Error,
        RunStatus::Interrupted,
        RunStatus::InternalError,
        RunStatus::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Interrupted => "interrupted",
            RunStatus::InternalError => "internal_error",
            RunStatus::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "started" => Some(RunStatus::Started),
            "completed" => Some(RunStatus::Completed),
            "error" => Some(RunStatus::Error),
            "interrupted" => Some(RunStatus::Interrupted),
            "internal_error" => Some(RunStatus::InternalError),
            "killed" => Some(RunStatus::Killed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for RunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        RunStatus::parse(s).ok_or_else(|| format!("Invalid run status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl Run {
    pub fn is_started(&self) -> bool {
        matches!(self.status, RunStatus::Started)
    }
}

// ============================================================================
// 通知通道
// ============================================================================

/// 通知通道，type 决定 config 的具体结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    /// 通道类型相关的不透明配置（email: {to}；slack: {token, channel}）
    pub config: serde_json::Value,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelKind {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "slack")]
    Slack,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Slack => "slack",
        }
    }

    pub fn parse(s: &str) -> Option<ChannelKind> {
        match s {
            "email" => Some(ChannelKind::Email),
            "slack" => Some(ChannelKind::Slack),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ChannelKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ChannelKind {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        ChannelKind::parse(s).ok_or_else(|| format!("Invalid channel type: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ChannelKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// email 通道配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default)]
    pub to: String,
}

/// slack 通道配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackChannelConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel: String,
}

// ============================================================================
// 订阅与通知
// ============================================================================

/// 订阅：把某个任务的运行状态事件绑定到通知通道
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub task: String,
    pub channel: String,
    /// 触发事件集合，运行状态的子集
    pub events: Vec<RunStatus>,
    /// 连续满足事件的最少运行次数，>=1
    pub threshold: i64,
    pub active: bool,
    /// 上次创建通知的时间水位，用于阈值评估去重
    pub notified: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, status: RunStatus) -> bool {
        self.events.contains(&status)
    }
}

/// 通知行：每条对应一次 (订阅, 触发运行)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub subscription: String,
    pub run: String,
    pub sent: bool,
    pub error_count: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}
