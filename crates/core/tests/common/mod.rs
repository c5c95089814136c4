use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scriptflow_config::Config;
use scriptflow_core::{NoopMailer, ScriptFlow};
use scriptflow_ssh::{OutputCallback, RemoteRunner, RunError, RunResult, SshConfig};
use scriptflow_testing_utils::InMemoryStore;

/// 假远程执行器的行为脚本
#[derive(Clone)]
pub enum Behavior {
    /// 输出给定行并以 0 退出
    Succeed(Vec<&'static str>),
    /// 非零退出
    ExitWith(i32),
    /// 传输失败
    SshFail(&'static str),
    /// 挂起直到取消
    HangUntilCancelled,
}

pub struct FakeRunner {
    pub behavior: Mutex<Behavior>,
    pub put_hosts: Mutex<Vec<String>>,
    pub commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            put_hosts: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        })
    }

    async fn run(&self, ctx: CancellationToken, command: &str, mut emit: OutputCallback) -> RunResult {
        self.commands.lock().unwrap().push(command.to_string());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed(lines) => {
                for line in lines {
                    emit(&format!("{line}\n"));
                }
                Ok(0)
            }
            Behavior::ExitWith(code) => Err(RunError::Command(code)),
            Behavior::SshFail(message) => Err(RunError::Ssh(message.to_string())),
            Behavior::HangUntilCancelled => {
                ctx.cancelled().await;
                Err(RunError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl RemoteRunner for FakeRunner {
    async fn run_context(
        &self,
        ctx: CancellationToken,
        _cfg: &SshConfig,
        command: &str,
        on_stdout: OutputCallback,
        _on_stderr: OutputCallback,
    ) -> RunResult {
        self.run(ctx, command, on_stdout).await
    }

    async fn run_combined_context(
        &self,
        ctx: CancellationToken,
        _cfg: &SshConfig,
        command: &str,
        on_output: OutputCallback,
    ) -> RunResult {
        self.run(ctx, command, on_output).await
    }

    fn put(&self, host: &str) {
        self.put_hosts.lock().unwrap().push(host.to_string());
    }
}

pub struct Harness {
    pub sf: Arc<ScriptFlow>,
    pub store: InMemoryStore,
    pub runner: Arc<FakeRunner>,
    pub root: CancellationToken,
    _logs_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_mailer(behavior, Arc::new(NoopMailer))
    }

    pub fn with_mailer(behavior: Behavior, mailer: Arc<dyn scriptflow_core::Mailer>) -> Self {
        let store = InMemoryStore::new();
        let runner = FakeRunner::new(behavior);
        let logs_dir = tempfile::tempdir().unwrap();
        let root = CancellationToken::new();
        let sf = ScriptFlow::new(
            store.entity_store(),
            runner.clone(),
            logs_dir.path().to_path_buf(),
            Config::default(),
            None,
            mailer,
            root.clone(),
        );
        Self {
            sf,
            store,
            runner,
            root,
            _logs_dir: logs_dir,
        }
    }

    pub fn logs_dir(&self) -> &std::path::Path {
        self._logs_dir.path()
    }
}
