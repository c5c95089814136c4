use thiserror::Error;

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum ScriptFlowError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },
    #[error("运行记录未找到: {id}")]
    RunNotFound { id: String },
    #[error("运行 {id} 不在执行中")]
    RunNotActive { id: String },
    #[error("任务未激活")]
    TaskNotActive,
    #[error("节点不在线")]
    NodeNotOnline,
    #[error("无效的调度表达式: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },
    #[error("日志文件错误: {0}")]
    LogFile(String),
    #[error("无效的日志文件名: {0}")]
    InvalidLogFileName(String),
    #[error("无法从日志文件名解析日期: {0}")]
    FailedParseDate(String),
    #[error("通知发送失败: {0}")]
    NotificationSend(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type ScriptFlowResult<T> = Result<T, ScriptFlowError>;

impl ScriptFlowError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        Self::NodeNotFound { id: id.into() }
    }
    pub fn run_not_found<S: Into<String>>(id: S) -> Self {
        Self::RunNotFound { id: id.into() }
    }
    pub fn invalid_schedule<S: Into<String>, M: Into<String>>(expr: S, message: M) -> Self {
        Self::InvalidSchedule {
            expr: expr.into(),
            message: message.into(),
        }
    }
    pub fn log_file<S: Into<String>>(msg: S) -> Self {
        Self::LogFile(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 静默跳过的查找失败：不创建运行记录，只记日志
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ScriptFlowError::TaskNotActive
                | ScriptFlowError::NodeNotOnline
                | ScriptFlowError::TaskNotFound { .. }
                | ScriptFlowError::NodeNotFound { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ScriptFlowError::TaskNotFound { .. }
                | ScriptFlowError::NodeNotFound { .. }
                | ScriptFlowError::RunNotFound { .. }
                | ScriptFlowError::RunNotActive { .. }
        )
    }
}

impl From<serde_json::Error> for ScriptFlowError {
    fn from(err: serde_json::Error) -> Self {
        ScriptFlowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ScriptFlowError {
    fn from(err: anyhow::Error) -> Self {
        ScriptFlowError::Internal(err.to_string())
    }
}
