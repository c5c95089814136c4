//! SSH 连接池
//!
//! 按主机缓存 SSH 会话，提供带流式回调与取消语义的远程命令执行。
//! 错误按类别区分：传输失败、非零退出码、取消。三者互不混淆，
//! 远程命令以非零码退出不算 SSH 错误。

mod pool;

pub use pool::{Pool, PoolConfig, SshConfig};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 远程执行错误分类
#[derive(Debug, Error)]
pub enum RunError {
    /// 连接或传输层失败（拨号、认证、会话中断）
    #[error("SSH错误: {0}")]
    Ssh(String),
    /// 远程命令以非零码退出
    #[error("命令退出码非零: {0}")]
    Command(i32),
    /// 上下文被取消，远程命令已被通知终止
    #[error("执行已取消")]
    Cancelled,
}

pub type RunResult = Result<i32, RunError>;

/// 输出回调：按行接收远程命令输出，完整行带换行符
pub type OutputCallback = Box<dyn FnMut(&str) + Send>;

/// 远程命令执行契约
///
/// 执行器通过该 trait 消费连接池，测试中注入假实现。
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// 执行命令，stdout/stderr 分流回调
    async fn run_context(
        &self,
        ctx: CancellationToken,
        cfg: &SshConfig,
        command: &str,
        on_stdout: OutputCallback,
        on_stderr: OutputCallback,
    ) -> RunResult;

    /// 执行命令，stdout 与 stderr 合并进单个回调（顺序尽力交织）
    async fn run_combined_context(
        &self,
        ctx: CancellationToken,
        cfg: &SshConfig,
        command: &str,
        on_output: OutputCallback,
    ) -> RunResult;

    /// 驱逐并关闭指定主机的缓存会话
    fn put(&self, host: &str);
}
