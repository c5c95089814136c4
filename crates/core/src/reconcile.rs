use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info};

use scriptflow_domain::Task;
use scriptflow_engine::Job;

use crate::context::ScriptFlow;
use crate::SYSTEM_TASK;

impl ScriptFlow {
    /// 两阶段对账：存储 → 作业映射 → 触发引擎
    ///
    /// 阶段一以存储为准修正作业映射，阶段二以映射为准修正引擎。
    /// 顺序不可颠倒：阶段一可能补建的作业要在阶段二校验。
    pub async fn reconcile_jobs(self: &Arc<Self>) {
        self.reconcile_active_jobs().await;
        self.reconcile_engine().await;
    }

    /// 阶段一：同步存储到作业映射
    ///
    /// 移除存储里已不活跃的孤儿映射项，补调度存储里有而映射缺失的任务。
    async fn reconcile_active_jobs(self: &Arc<Self>) {
        let active_tasks = match self.store.tasks.get_active_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("对账时查询活跃任务失败: {e}");
                return;
            }
        };

        let (orphaned_jobs, missing_tasks) = self.find_active_jobs_mismatches(&active_tasks);

        let orphaned_count = self.remove_orphaned_active_jobs(&orphaned_jobs);
        let scheduled_count = self.schedule_missing_active_tasks(missing_tasks);

        if orphaned_count > 0 || scheduled_count > 0 {
            info!(
                orphaned_jobs_removed = orphaned_count,
                missing_tasks_scheduled = scheduled_count,
                "作业映射对账完成"
            );
        }
    }

    /// 比对存储中的活跃任务与作业映射
    fn find_active_jobs_mismatches(&self, active_tasks: &[Task]) -> (Vec<String>, Vec<Task>) {
        let active_task_ids: HashSet<&str> = active_tasks.iter().map(|t| t.id.as_str()).collect();

        let jobs = self.active_jobs.read().unwrap();

        let orphaned_jobs: Vec<String> = jobs
            .keys()
            .filter(|task_id| !active_task_ids.contains(task_id.as_str()))
            .cloned()
            .collect();

        let missing_tasks: Vec<Task> = active_tasks
            .iter()
            .filter(|task| !jobs.contains_key(&task.id))
            .cloned()
            .collect();

        (orphaned_jobs, missing_tasks)
    }

    fn remove_orphaned_active_jobs(&self, orphaned_jobs: &[String]) -> usize {
        let mut count = 0;
        let mut jobs = self.active_jobs.write().unwrap();
        for task_id in orphaned_jobs {
            if let Some(job) = jobs.get(task_id) {
                match self.engine.remove_job(job.id) {
                    Ok(()) => {
                        jobs.remove(task_id);
                        count += 1;
                        info!(task_id, "已移除作业映射中的孤儿作业");
                    }
                    Err(e) => {
                        error!(task_id, "移除孤儿作业失败: {e}");
                        // 引擎里已经不存在，映射项同样是孤儿
                        jobs.remove(task_id);
                        count += 1;
                    }
                }
            }
        }
        count
    }

    fn schedule_missing_active_tasks(self: &Arc<Self>, missing_tasks: Vec<Task>) -> usize {
        let count = missing_tasks.len();
        for task in missing_tasks {
            info!(task_id = %task.id, "补调度存储中缺失的任务");
            let sf = Arc::clone(self);
            tokio::spawn(async move {
                sf.schedule_task(&task).await;
            });
        }
        count
    }

    /// 阶段二：同步作业映射到触发引擎
    ///
    /// 移除引擎里映射之外的孤儿触发器，重建映射里有而引擎缺失的触发器。
    async fn reconcile_engine(self: &Arc<Self>) {
        let user_jobs = self.user_jobs();
        let (orphaned_jobs, missing_task_ids) = self.find_engine_mismatches(&user_jobs);

        let orphaned_count = self.remove_orphaned_engine_jobs(&orphaned_jobs);
        let rescheduled_count = self.reschedule_missing_tasks(missing_task_ids).await;

        if orphaned_count > 0 || rescheduled_count > 0 {
            info!(
                orphaned_engine_jobs = orphaned_count,
                rescheduled_jobs = rescheduled_count,
                "触发引擎对账完成"
            );
        }
    }

    /// 引擎中的全部用户作业（排除 system-task 标签）
    fn user_jobs(&self) -> Vec<Job> {
        self.engine
            .jobs()
            .into_iter()
            .filter(|job| !job.tags.iter().any(|tag| tag == SYSTEM_TASK))
            .collect()
    }

    /// 比对引擎作业与作业映射
    fn find_engine_mismatches(&self, user_jobs: &[Job]) -> (Vec<Job>, Vec<String>) {
        let jobs = self.active_jobs.read().unwrap();

        let orphaned_jobs: Vec<Job> = user_jobs
            .iter()
            .filter(|job| {
                job.tags
                    .first()
                    .map(|task_id| !jobs.contains_key(task_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let engine_job_ids: HashSet<_> = user_jobs.iter().map(|job| job.id).collect();
        let missing_task_ids: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| !engine_job_ids.contains(&job.id))
            .map(|(task_id, _)| task_id.clone())
            .collect();

        (orphaned_jobs, missing_task_ids)
    }

    fn remove_orphaned_engine_jobs(&self, orphaned_jobs: &[Job]) -> usize {
        let mut count = 0;
        for job in orphaned_jobs {
            match self.engine.remove_job(job.id) {
                Ok(()) => {
                    count += 1;
                    info!(job_id = %job.id, "已移除引擎中的孤儿作业");
                }
                Err(e) => {
                    error!(job_id = %job.id, "移除引擎孤儿作业失败: {e}");
                }
            }
        }
        count
    }

    /// 重建映射里有而引擎缺失的触发器；任务已不可加载时清掉陈旧映射项
    async fn reschedule_missing_tasks(self: &Arc<Self>, missing_task_ids: Vec<String>) -> usize {
        let mut count = 0;
        for task_id in missing_task_ids {
            match self.store.tasks.get_by_id(&task_id).await {
                Ok(Some(task)) => {
                    info!(task_id = %task.id, "重建缺失的触发器");
                    // 引擎端句柄已丢失，先清映射再重新调度
                    self.remove_active_job(&task_id);
                    let sf = Arc::clone(self);
                    tokio::spawn(async move {
                        sf.schedule_task(&task).await;
                    });
                    count += 1;
                }
                Ok(None) => {
                    error!(task_id, "重调度时任务已不存在，清除陈旧映射项");
                    self.remove_active_job(&task_id);
                }
                Err(e) => {
                    error!(task_id, "重调度时加载任务失败: {e}");
                    self.remove_active_job(&task_id);
                }
            }
        }
        count
    }
}
