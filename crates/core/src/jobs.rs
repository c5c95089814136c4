use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use scriptflow_domain::{Node, NodeStatus, Project};
use scriptflow_engine::{JobDefinition, JobTask};

use crate::context::ScriptFlow;
use crate::executor::node_ssh_config;
use crate::{
    JOB_CHECK_NODE_STATUS, JOB_RECONCILE_JOBS, JOB_REMOVE_OUTDATED_LOGS,
    JOB_REMOVE_OUTDATED_RECORDS, JOB_SEND_NOTIFICATIONS, SYSTEM_TASK,
};

/// 节点探测的单次超时
const NODE_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

impl ScriptFlow {
    /// 注册系统作业
    ///
    /// 全部打 system-task 标签与单例防重叠：节点探测与通知发送每 30 秒，
    /// 日志保留 39 * * * *，记录保留 39 1 * * *，对账整点。
    pub(crate) fn schedule_system_tasks(self: &Arc<Self>) {
        let every_30s = Duration::from_secs(30);

        self.system_job(
            JOB_CHECK_NODE_STATUS,
            JobDefinition::random_duration(every_30s, every_30s),
            {
                let sf = Arc::clone(self);
                Arc::new(move || {
                    let sf = Arc::clone(&sf);
                    Box::pin(async move { sf.job_check_node_status().await })
                })
            },
        );

        self.system_job(
            JOB_SEND_NOTIFICATIONS,
            JobDefinition::random_duration(every_30s, every_30s),
            {
                let sf = Arc::clone(self);
                Arc::new(move || {
                    let sf = Arc::clone(&sf);
                    Box::pin(async move { sf.job_send_notifications().await })
                })
            },
        );

        self.system_job(JOB_REMOVE_OUTDATED_LOGS, JobDefinition::cron("39 * * * *"), {
            let sf = Arc::clone(self);
            Arc::new(move || {
                let sf = Arc::clone(&sf);
                Box::pin(async move { sf.job_remove_outdated_logs().await })
            })
        });

        self.system_job(
            JOB_REMOVE_OUTDATED_RECORDS,
            JobDefinition::cron("39 1 * * *"),
            {
                let sf = Arc::clone(self);
                Arc::new(move || {
                    let sf = Arc::clone(&sf);
                    Box::pin(async move { sf.job_remove_outdated_records().await })
                })
            },
        );

        self.system_job(JOB_RECONCILE_JOBS, JobDefinition::cron("0 * * * *"), {
            let sf = Arc::clone(self);
            Arc::new(move || {
                let sf = Arc::clone(&sf);
                Box::pin(async move { sf.reconcile_jobs().await })
            })
        });
    }

    fn system_job(
        &self,
        name: &str,
        definition: Result<JobDefinition, scriptflow_engine::EngineError>,
        task: JobTask,
    ) {
        match definition {
            Ok(definition) => {
                self.engine.new_job(
                    definition,
                    task,
                    vec![SYSTEM_TASK.to_string(), name.to_string()],
                );
                debug!(job = name, "系统作业已注册");
            }
            Err(e) => {
                error!(job = name, "注册系统作业失败: {e}");
            }
        }
    }

    /// 探测全部节点并维护在线状态
    ///
    /// 每个节点并行跑一次 `uptime`，探测用独立的 15 秒超时令牌，
    /// 防止不可达主机挂住探测任务。只有状态变化才写回存储；
    /// 节点转为离线时驱逐其缓存会话。
    pub(crate) async fn job_check_node_status(self: &Arc<Self>) {
        let nodes = match self.store.nodes.list().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("查询节点列表失败: {e}");
                return;
            }
        };

        for node in nodes {
            debug!(node_id = %node.id, host = %node.host, "探测节点状态");
            let sf = Arc::clone(self);
            tokio::spawn(async move {
                sf.probe_node(node).await;
            });
        }
    }

    async fn probe_node(&self, node: Node) {
        let old_status = node.status;
        let probe_ctx = CancellationToken::new();

        let ssh_config = node_ssh_config(&node);
        let probe = self.pool.run_context(
            probe_ctx.clone(),
            &ssh_config,
            "uptime",
            Box::new(|_stdout| {}),
            Box::new(|_stderr| {}),
        );

        let new_status = match tokio::time::timeout(NODE_PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => NodeStatus::Online,
            Ok(Err(e)) => {
                error!(node_id = %node.id, host = %node.host, "节点探测失败: {e}");
                NodeStatus::Offline
            }
            Err(_) => {
                probe_ctx.cancel();
                error!(node_id = %node.id, host = %node.host, "节点探测超时");
                NodeStatus::Offline
            }
        };

        if old_status != new_status {
            info!(
                node_id = %node.id,
                host = %node.host,
                old = %old_status,
                new = %new_status,
                "节点状态变化"
            );
            if let Err(e) = self.store.nodes.update_status(&node.id, new_status).await {
                error!(node_id = %node.id, "保存节点状态失败: {e}");
            }
            if new_status == NodeStatus::Offline {
                self.pool.put(&node.host);
            }
        }
    }

    /// 清理过期日志文件
    ///
    /// 逐项目取保留天数，删除日期早于 now - (days + 1) 的日志文件。
    /// 多出的一天宽限保住 UTC 午夜边界上的当日文件。
    pub(crate) async fn job_remove_outdated_logs(&self) {
        let projects = match self.store.projects.list().await {
            Ok(projects) => projects,
            Err(e) => {
                error!("查询项目列表失败: {e}");
                return;
            }
        };

        for project in projects {
            info!(project_id = %project.id, "开始清理项目的过期日志文件");
            let (cutoff, tasks) = match self.project_retention_details(&project).await {
                Ok(details) => details,
                Err(e) => {
                    error!(project_id = %project.id, "读取项目保留策略失败: {e}");
                    continue;
                }
            };
            let cutoff_date = cutoff.date_naive();

            for task in tasks {
                let log_dir = self.log_store.task_log_root_dir(&task.id);
                let entries = match std::fs::read_dir(&log_dir) {
                    Ok(entries) => entries,
                    Err(e) => {
                        debug!(task_id = %task.id, "读取任务日志目录失败: {e}");
                        continue;
                    }
                };

                for entry in entries.flatten() {
                    if entry.path().is_dir() {
                        continue;
                    }
                    let file_name = entry.file_name().to_string_lossy().into_owned();
                    let file_date = match scriptflow_logs::task_file_date(&file_name) {
                        Ok(date) => date,
                        Err(e) => {
                            error!(file_name, "解析日志文件名失败: {e}");
                            continue;
                        }
                    };

                    if file_date < cutoff_date {
                        let file_path = log_dir.join(&file_name);
                        match std::fs::remove_file(&file_path) {
                            Ok(()) => {
                                info!(file_path = %file_path.display(), "已删除过期日志文件");
                            }
                            Err(e) => {
                                error!(file_path = %file_path.display(), "删除过期日志文件失败: {e}");
                            }
                        }
                    }
                }
            }
        }
    }

    /// 清理过期运行记录，同样带一天宽限
    pub(crate) async fn job_remove_outdated_records(&self) {
        let projects = match self.store.projects.list().await {
            Ok(projects) => projects,
            Err(e) => {
                error!("查询项目列表失败: {e}");
                return;
            }
        };

        for project in projects {
            info!(project_id = %project.id, "开始清理项目的过期运行记录");
            let (cutoff, tasks) = match self.project_retention_details(&project).await {
                Ok(details) => details,
                Err(e) => {
                    error!(project_id = %project.id, "读取项目保留策略失败: {e}");
                    continue;
                }
            };

            for task in tasks {
                match self.store.runs.delete_older_than(&task.id, cutoff).await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        info!(task_id = %task.id, deleted, cutoff = %cutoff, "已删除过期运行记录");
                    }
                    Err(e) => {
                        error!(task_id = %task.id, "删除过期运行记录失败: {e}");
                    }
                }
            }
        }
    }

    /// 项目的保留截止时间与任务列表
    async fn project_retention_details(
        &self,
        project: &Project,
    ) -> scriptflow_errors::ScriptFlowResult<(chrono::DateTime<Utc>, Vec<scriptflow_domain::Task>)>
    {
        let retention_days = project.retention_days();
        let tasks = self.store.tasks.get_by_project(&project.id).await?;
        // 多留一天
        let cutoff = Utc::now() - chrono::Duration::days(retention_days + 1);
        Ok((cutoff, tasks))
    }
}
