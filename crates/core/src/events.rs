use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use scriptflow_domain::RecordEvent;

use crate::context::ScriptFlow;

impl ScriptFlow {
    /// 启动记录事件路由
    ///
    /// 订阅存储的变更事件并派发到调度、通知与失败计数等处理器。
    /// 每个事件的处理都在独立任务里进行，路由循环自身不做 I/O。
    pub(crate) fn start_event_router(self: &Arc<Self>) {
        let mut events = self.store.subscribe();
        let sf = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sf.root.cancelled() => {
                        info!("事件路由退出");
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(event) => sf.dispatch_record_event(event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "事件路由落后，部分记录事件被丢弃");
                        }
                        Err(RecvError::Closed) => {
                            info!("记录事件通道关闭，事件路由退出");
                            return;
                        }
                    }
                }
            }
        });
    }

    fn dispatch_record_event(self: &Arc<Self>, event: RecordEvent) {
        match event {
            RecordEvent::TaskCreated { task } | RecordEvent::TaskUpdated { task } => {
                let sf = Arc::clone(self);
                tokio::spawn(async move {
                    sf.schedule_task(&task).await;
                });
            }
            RecordEvent::TaskDeleted { task_id } => {
                self.handle_task_deleted(&task_id);
            }
            RecordEvent::NodeUpdated { node } => {
                // 连接参数可能已变化，驱逐会话迫使下次执行重新拨号
                self.pool.put(&node.host);
            }
            RecordEvent::RunCreated { run } => {
                let sf = Arc::clone(self);
                tokio::spawn(async move {
                    sf.process_run_notification(&run).await;
                });
            }
            RecordEvent::RunUpdated { run } => {
                let sf = Arc::clone(self);
                let run_for_count = run.clone();
                tokio::spawn(async move {
                    sf.process_run_notification(&run).await;
                });
                let sf = Arc::clone(self);
                tokio::spawn(async move {
                    sf.update_task_failure_count(&run_for_count).await;
                });
            }
        }
    }

    fn handle_task_deleted(self: &Arc<Self>, task_id: &str) {
        if let Some(job) = self.get_active_job(task_id) {
            match self.engine.remove_job(job.id) {
                Ok(()) => {
                    self.remove_active_job(task_id);
                    info!(task_id, "已移除被删除任务的触发器");
                }
                Err(e) => {
                    error!(task_id, "移除被删除任务的触发器失败: {e}");
                }
            }
        }

        // 日志目录可能很大，后台慢慢删
        let log_store = self.log_store.clone();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = log_store.remove_task_logs(&task_id) {
                error!(task_id, "删除任务日志目录失败: {e}");
            }
        });
    }
}
