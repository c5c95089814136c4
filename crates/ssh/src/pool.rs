use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{OutputCallback, RemoteRunner, RunError, RunResult};

/// 单个节点的 SSH 连接参数
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub host: String,
    /// 私钥路径，None 时使用池级默认私钥
    pub private_key: Option<PathBuf>,
}

/// 连接池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 节点未指定私钥时的默认私钥（通常是 ~/.ssh/id_rsa）
    pub default_private_key: PathBuf,
    /// TCP 拨号超时
    pub dial_timeout: Duration,
}

impl PoolConfig {
    pub fn new(default_private_key: PathBuf) -> Self {
        Self {
            default_private_key,
            dial_timeout: Duration::from_secs(10),
        }
    }
}

/// 读超时毫秒数。阻塞读之间轮询取消令牌的间隔上限。
const READ_POLL_TIMEOUT_MS: u32 = 500;

struct CachedSession {
    session: Mutex<Session>,
}

/// 按主机缓存会话的连接池
///
/// 键是主机名，不含用户与密钥。节点凭据变更通过 `put` 驱逐旧会话，
/// 下次执行时用新参数重新拨号。
pub struct Pool {
    cfg: PoolConfig,
    sessions: Mutex<HashMap<String, Arc<CachedSession>>>,
}

impl Pool {
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 取出缓存会话；不存在时返回 None
    fn cached(&self, host: &str) -> Option<Arc<CachedSession>> {
        self.sessions.lock().unwrap().get(host).cloned()
    }

    fn cache(&self, host: &str, session: Arc<CachedSession>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(host.to_string(), session);
    }

    fn evict(&self, host: &str) {
        if let Some(cached) = self.sessions.lock().unwrap().remove(host) {
            if let Ok(session) = cached.session.lock() {
                let _ = session.disconnect(None, "scriptflow evict", None);
            }
            debug!(host, "已驱逐缓存的SSH会话");
        }
    }

    fn key_path<'a>(&'a self, cfg: &'a SshConfig) -> &'a Path {
        cfg.private_key
            .as_deref()
            .unwrap_or(&self.cfg.default_private_key)
    }

    /// 拨号并完成公钥认证（阻塞，必须在 spawn_blocking 中调用）
    fn dial_blocking(cfg: &SshConfig, key: &Path, dial_timeout: Duration) -> Result<Session, RunError> {
        let addr_str = if cfg.host.contains(':') {
            cfg.host.clone()
        } else {
            format!("{}:22", cfg.host)
        };
        let addr = addr_str
            .to_socket_addrs()
            .map_err(|e| RunError::Ssh(format!("解析地址 {addr_str} 失败: {e}")))?
            .next()
            .ok_or_else(|| RunError::Ssh(format!("地址 {addr_str} 无法解析")))?;

        let stream = TcpStream::connect_timeout(&addr, dial_timeout)
            .map_err(|e| RunError::Ssh(format!("连接 {addr_str} 失败: {e}")))?;

        let mut session = Session::new().map_err(|e| RunError::Ssh(e.to_string()))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| RunError::Ssh(format!("SSH握手失败: {e}")))?;
        session
            .userauth_pubkey_file(&cfg.user, None, key, None)
            .map_err(|e| RunError::Ssh(format!("公钥认证失败: {e}")))?;
        if !session.authenticated() {
            return Err(RunError::Ssh("认证未通过".to_string()));
        }
        Ok(session)
    }

    /// 获取可用会话：优先复用缓存，没有时重新拨号
    ///
    /// 返回值第二项标记会话是否来自缓存。
    async fn session_for(&self, cfg: &SshConfig) -> Result<(Arc<CachedSession>, bool), RunError> {
        if let Some(cached) = self.cached(&cfg.host) {
            return Ok((cached, true));
        }

        let dial_cfg = cfg.clone();
        let key = self.key_path(cfg).to_path_buf();
        let dial_timeout = self.cfg.dial_timeout;
        let session = tokio::task::spawn_blocking(move || {
            Self::dial_blocking(&dial_cfg, &key, dial_timeout)
        })
        .await
        .map_err(|e| RunError::Ssh(format!("拨号任务失败: {e}")))??;

        debug!(host = %cfg.host, user = %cfg.user, "建立新的SSH会话");
        let cached = Arc::new(CachedSession {
            session: Mutex::new(session),
        });
        self.cache(&cfg.host, Arc::clone(&cached));
        Ok((cached, false))
    }

    async fn exec_once(
        &self,
        ctx: CancellationToken,
        cached: Arc<CachedSession>,
        command: &str,
        on_stdout: OutputCallback,
        on_stderr: OutputCallback,
    ) -> Result<ExecOutcome, RunError> {
        let command_owned = command.to_string();
        tokio::task::spawn_blocking(move || {
            exec_blocking(&cached, &command_owned, ctx, on_stdout, on_stderr)
        })
        .await
        .map_err(|e| RunError::Ssh(format!("执行任务失败: {e}")))
    }

    async fn run_inner(
        &self,
        ctx: CancellationToken,
        cfg: &SshConfig,
        command: &str,
        on_stdout: OutputCallback,
        on_stderr: OutputCallback,
    ) -> RunResult {
        let (cached, from_cache) = self.session_for(cfg).await?;
        let outcome = self
            .exec_once(ctx.clone(), cached, command, on_stdout, on_stderr)
            .await?;

        let (message, on_stdout, on_stderr) = match outcome {
            ExecOutcome::Done(result) => {
                if matches!(result, Err(RunError::Ssh(_))) {
                    self.evict(&cfg.host);
                }
                return result;
            }
            // 通道都没开起来，命令未执行，回调原样拿回
            ExecOutcome::ChannelOpenFailed {
                message,
                on_stdout,
                on_stderr,
            } => (message, on_stdout, on_stderr),
        };

        self.evict(&cfg.host);
        if !from_cache {
            return Err(RunError::Ssh(message));
        }

        // 缓存会话已死：重拨一次后重试
        debug!(host = %cfg.host, "缓存会话已失效，重新拨号: {message}");
        let (fresh, _) = self.session_for(cfg).await?;
        match self
            .exec_once(ctx, fresh, command, on_stdout, on_stderr)
            .await?
        {
            ExecOutcome::Done(result) => {
                if matches!(result, Err(RunError::Ssh(_))) {
                    self.evict(&cfg.host);
                }
                result
            }
            ExecOutcome::ChannelOpenFailed { message, .. } => {
                self.evict(&cfg.host);
                Err(RunError::Ssh(message))
            }
        }
    }
}

#[async_trait]
impl RemoteRunner for Pool {
    async fn run_context(
        &self,
        ctx: CancellationToken,
        cfg: &SshConfig,
        command: &str,
        on_stdout: OutputCallback,
        on_stderr: OutputCallback,
    ) -> RunResult {
        self.run_inner(ctx, cfg, command, on_stdout, on_stderr).await
    }

    async fn run_combined_context(
        &self,
        ctx: CancellationToken,
        cfg: &SshConfig,
        command: &str,
        on_output: OutputCallback,
    ) -> RunResult {
        // stdout/stderr 写同一个回调，顺序按到达交织
        let shared = Arc::new(Mutex::new(on_output));
        let stdout_cb = {
            let shared = Arc::clone(&shared);
            Box::new(move |line: &str| {
                let mut callback = shared.lock().unwrap();
                (*callback)(line);
            }) as OutputCallback
        };
        let stderr_cb = {
            let shared = Arc::clone(&shared);
            Box::new(move |line: &str| {
                let mut callback = shared.lock().unwrap();
                (*callback)(line);
            }) as OutputCallback
        };
        self.run_inner(ctx, cfg, command, stdout_cb, stderr_cb).await
    }

    fn put(&self, host: &str) {
        self.evict(host);
    }
}

/// 行缓冲：积累字节，吐出完整行（含换行符）
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) {
        self.buf.extend_from_slice(bytes);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            emit(&String::from_utf8_lossy(&line));
        }
    }

    /// EOF 后冲出最后的不完整行
    fn flush(&mut self, mut emit: impl FnMut(&str)) {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            emit(&String::from_utf8_lossy(&rest));
        }
    }
}

fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

/// 单次阻塞执行的结果
///
/// 通道打开或 exec 请求失败时命令从未启动，回调原样交还，
/// 调用方可以安全地换会话重试。
enum ExecOutcome {
    Done(RunResult),
    ChannelOpenFailed {
        message: String,
        on_stdout: OutputCallback,
        on_stderr: OutputCallback,
    },
}

/// 阻塞执行远程命令，边读边回调
///
/// 读超时做为取消轮询点：令牌取消后关闭通道并返回 Cancelled。
fn exec_blocking(
    cached: &CachedSession,
    command: &str,
    token: CancellationToken,
    mut on_stdout: OutputCallback,
    mut on_stderr: OutputCallback,
) -> ExecOutcome {
    let session = match cached.session.lock() {
        Ok(session) => session,
        Err(_) => {
            return ExecOutcome::Done(Err(RunError::Ssh("会话锁被污染".to_string())));
        }
    };
    session.set_blocking(true);
    session.set_timeout(READ_POLL_TIMEOUT_MS);

    let mut channel = match session.channel_session() {
        Ok(channel) => channel,
        Err(e) => {
            drop(session);
            return ExecOutcome::ChannelOpenFailed {
                message: format!("打开会话通道失败: {e}"),
                on_stdout,
                on_stderr,
            };
        }
    };
    if let Err(e) = channel.exec(command) {
        drop(channel);
        drop(session);
        return ExecOutcome::ChannelOpenFailed {
            message: format!("执行命令失败: {e}"),
            on_stdout,
            on_stderr,
        };
    }

    let result = stream_channel(&mut channel, &token, &mut on_stdout, &mut on_stderr);
    ExecOutcome::Done(result)
}

/// 流式读取通道输出直到 EOF，然后取退出码
fn stream_channel(
    channel: &mut ssh2::Channel,
    token: &CancellationToken,
    on_stdout: &mut OutputCallback,
    on_stderr: &mut OutputCallback,
) -> RunResult {
    let mut stdout_lines = LineBuffer::new();
    let mut stderr_lines = LineBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut stdout_eof = false;
    let mut stderr_eof = false;

    while !(stdout_eof && stderr_eof) {
        if token.is_cancelled() {
            let _ = channel.close();
            return Err(RunError::Cancelled);
        }

        if !stdout_eof {
            match channel.read(&mut chunk) {
                Ok(0) => stdout_eof = true,
                Ok(n) => stdout_lines.push(&chunk[..n], |line| on_stdout(line)),
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => return Err(RunError::Ssh(format!("读取stdout失败: {e}"))),
            }
        }

        if !stderr_eof {
            match channel.stderr().read(&mut chunk) {
                Ok(0) => stderr_eof = true,
                Ok(n) => stderr_lines.push(&chunk[..n], |line| on_stderr(line)),
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => return Err(RunError::Ssh(format!("读取stderr失败: {e}"))),
            }
        }
    }

    stdout_lines.flush(|line| on_stdout(line));
    stderr_lines.flush(|line| on_stderr(line));

    if let Err(e) = channel.wait_close() {
        warn!("等待通道关闭失败: {e}");
    }
    let exit_code = channel
        .exit_status()
        .map_err(|e| RunError::Ssh(format!("读取退出码失败: {e}")))?;

    if exit_code != 0 {
        return Err(RunError::Command(exit_code));
    }
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_emits_complete_lines() {
        let mut lb = LineBuffer::new();
        let mut out = Vec::new();
        lb.push(b"hello ", |l| out.push(l.to_string()));
        assert!(out.is_empty());
        lb.push(b"world\npartial", |l| out.push(l.to_string()));
        assert_eq!(out, vec!["hello world\n"]);
        lb.flush(|l| out.push(l.to_string()));
        assert_eq!(out, vec!["hello world\n", "partial"]);
    }

    #[test]
    fn test_line_buffer_multiple_lines_in_one_chunk() {
        let mut lb = LineBuffer::new();
        let mut out = Vec::new();
        lb.push(b"a\nb\nc\n", |l| out.push(l.to_string()));
        assert_eq!(out, vec!["a\n", "b\n", "c\n"]);
    }

    #[test]
    fn test_pool_config_default_dial_timeout() {
        let cfg = PoolConfig::new(PathBuf::from("/home/u/.ssh/id_rsa"));
        assert_eq!(cfg.dial_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_against_unreachable_host_is_ssh_error() {
        let pool = Pool::new(PoolConfig {
            default_private_key: PathBuf::from("/nonexistent/id_rsa"),
            dial_timeout: Duration::from_millis(200),
        });
        let cfg = SshConfig {
            user: "nobody".to_string(),
            // TEST-NET-1，不可达
            host: "192.0.2.1:2222".to_string(),
            private_key: None,
        };
        let result = pool
            .run_combined_context(
                CancellationToken::new(),
                &cfg,
                "uptime",
                Box::new(|_| {}),
            )
            .await;
        assert!(matches!(result, Err(RunError::Ssh(_))));
    }
}
