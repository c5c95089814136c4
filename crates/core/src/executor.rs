use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scriptflow_domain::{NewRun, Node, RunOutcome, Task};
use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};
use scriptflow_logs::write_run_separator;
use scriptflow_ssh::{OutputCallback, RunError, SshConfig};

use crate::context::ScriptFlow;

/// 执行过程中的错误来源
enum ExecError {
    /// 日志写入等本地故障
    Internal(ScriptFlowError),
    /// 远程执行故障（传输、非零退出、取消）
    Remote(RunError),
}

/// 在途运行登记的退出守卫，保证所有路径都会注销
struct ActiveRunGuard {
    sf: Arc<ScriptFlow>,
    run_id: String,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.sf.unregister_active_run(&self.run_id);
    }
}

impl ScriptFlow {
    /// 执行一次任务
    ///
    /// 解析任务与节点 → 建运行记录 → 登记取消句柄 → 打开日志并写分隔行 →
    /// 经连接池执行 → 按错误类别写终态。终态只写一次，注销在所有退出
    /// 路径上保证发生。
    pub async fn run_task(self: &Arc<Self>, task_id: &str) {
        let (node, task) = match self.find_node_and_task_to_run(task_id).await {
            Ok(found) => found,
            Err(e) if e.is_skip() => {
                // 不建运行记录，静默跳过
                info!(task_id, "跳过本次执行: {e}");
                return;
            }
            Err(e) => {
                error!(task_id, "查找任务或节点失败: {e}");
                return;
            }
        };

        let run = match self
            .store
            .runs
            .create(&NewRun {
                task: task.id.clone(),
                host: node.host.clone(),
                command: task.command.clone(),
            })
            .await
        {
            Ok(run) => run,
            Err(e) => {
                error!(task_id, "创建运行记录失败: {e}");
                return;
            }
        };

        let run_ctx = self.root.child_token();
        self.register_active_run(&run.id, run_ctx.clone());
        let _guard = ActiveRunGuard {
            sf: Arc::clone(self),
            run_id: run.id.clone(),
        };

        let log_file = match self.log_store.create_log_file(&task.id) {
            Ok(file) => file,
            Err(e) => {
                error!(task_id, run_id = %run.id, "日志文件错误: {e}");
                return;
            }
        };

        info!(task_id, run_id = %run.id, host = %node.host, "执行任务");
        let result = self
            .execute_command(run_ctx.clone(), &node, &task, &run.id, log_file)
            .await;

        let outcome = match result {
            Ok(exit_code) => RunOutcome::completed(exit_code.into()),
            Err(_) if run_ctx.is_cancelled() => {
                info!(task_id, run_id = %run.id, "任务已被终止");
                RunOutcome::killed()
            }
            Err(ExecError::Remote(RunError::Cancelled)) => {
                info!(task_id, run_id = %run.id, "任务已被终止");
                RunOutcome::killed()
            }
            Err(ExecError::Internal(e)) => {
                error!(task_id, run_id = %run.id, "内部错误: {e}");
                RunOutcome::internal_error()
            }
            Err(ExecError::Remote(RunError::Ssh(message))) => {
                error!(task_id, run_id = %run.id, "SSH错误: {message}");
                RunOutcome::interrupted(message)
            }
            Err(ExecError::Remote(RunError::Command(exit_code))) => {
                error!(task_id, run_id = %run.id, exit_code, "命令退出码非零");
                RunOutcome::error(Some(exit_code as i64))
            }
        };

        if let Err(e) = self.store.runs.set_outcome(&run.id, &outcome).await {
            error!(run_id = %run.id, "保存运行记录失败: {e}");
        }
    }

    /// 解析待执行的任务与节点
    ///
    /// 节点不在线或任务不活跃时静默失败（不建运行记录）。
    async fn find_node_and_task_to_run(
        &self,
        task_id: &str,
    ) -> ScriptFlowResult<(Node, Task)> {
        let task = self
            .store
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| ScriptFlowError::task_not_found(task_id))?;

        let node = self
            .store
            .nodes
            .get_by_id(&task.node)
            .await?
            .ok_or_else(|| ScriptFlowError::node_not_found(&task.node))?;

        if !node.is_online() {
            return Err(ScriptFlowError::NodeNotOnline);
        }
        if !task.active {
            return Err(ScriptFlowError::TaskNotActive);
        }

        Ok((node, task))
    }

    /// 写分隔行并经连接池执行命令，输出逐行落盘
    async fn execute_command(
        &self,
        ctx: CancellationToken,
        node: &Node,
        task: &Task,
        run_id: &str,
        mut log_file: File,
    ) -> Result<i32, ExecError> {
        write_run_separator(&mut log_file, run_id).map_err(ExecError::Internal)?;

        let prepend_datetime = task.prepend_datetime;
        let shared_file = Arc::new(Mutex::new(log_file));
        let callback_file = Arc::clone(&shared_file);
        let on_output: OutputCallback = Box::new(move |out: &str| {
            let line = if prepend_datetime {
                format!(
                    "[{}] {}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    out
                )
            } else {
                out.to_string()
            };
            let mut file = callback_file.lock().unwrap();
            if let Err(e) = file.write_all(line.as_bytes()) {
                error!("写入日志文件失败: {e}");
            }
            // 立即刷盘，文件监视端才能看到
            if let Err(e) = file.sync_data() {
                error!("刷新日志文件失败: {e}");
            }
        });

        self.pool
            .run_combined_context(ctx, &node_ssh_config(node), &task.command, on_output)
            .await
            .map_err(ExecError::Remote)
    }

    /// 终止在途运行
    ///
    /// 取消其子令牌，执行器观察到取消后把终态归类为 killed。
    pub fn kill_run(&self, run_id: &str) -> ScriptFlowResult<()> {
        let cancel = self.active_runs.read().unwrap().get(run_id).cloned();
        match cancel {
            Some(cancel) => {
                info!(run_id, "终止运行");
                cancel.cancel();
                Ok(())
            }
            None => Err(ScriptFlowError::RunNotActive {
                id: run_id.to_string(),
            }),
        }
    }
}

pub(crate) fn node_ssh_config(node: &Node) -> SshConfig {
    SshConfig {
        user: node.username.clone(),
        host: node.host.clone(),
        private_key: node.private_key.as_ref().map(PathBuf::from),
    }
}
