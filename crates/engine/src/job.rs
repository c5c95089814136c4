use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("无效的cron表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的触发间隔: min {min:?} > max {max:?}")]
    InvalidInterval { min: Duration, max: Duration },
    #[error("作业未找到: {0}")]
    JobNotFound(Uuid),
}

/// 作业触发定义
#[derive(Debug, Clone)]
pub enum JobDefinition {
    /// cron 表达式触发
    Cron(Box<Schedule>),
    /// 固定间隔触发，每次触发在 [min, max] 内均匀重抽一个间隔
    RandomDuration { min: Duration, max: Duration },
}

impl JobDefinition {
    /// 解析 cron 表达式。五段式标准 cron 会补上秒字段。
    pub fn cron(expr: &str) -> Result<Self, EngineError> {
        let trimmed = expr.trim();
        let with_seconds = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };
        let schedule = Schedule::from_str(&with_seconds).map_err(|e| EngineError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(JobDefinition::Cron(Box::new(schedule)))
    }

    pub fn random_duration(min: Duration, max: Duration) -> Result<Self, EngineError> {
        if min > max || min.is_zero() {
            return Err(EngineError::InvalidInterval { min, max });
        }
        Ok(JobDefinition::RandomDuration { min, max })
    }

    /// 距离下一次触发的等待时长
    fn next_wait(&self) -> Duration {
        match self {
            JobDefinition::Cron(schedule) => {
                let now = Utc::now();
                match schedule.after(&now).next() {
                    Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                    // 表达式没有未来触发点，退避等待再查
                    None => Duration::from_secs(3600),
                }
            }
            JobDefinition::RandomDuration { min, max } => {
                if min == max {
                    *min
                } else {
                    let min_ms = min.as_millis() as u64;
                    let max_ms = max.as_millis() as u64;
                    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
                }
            }
        }
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 作业执行体：每次触发调用一次，产出一个 future
pub type JobTask = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// 作业句柄，id 在原地更新后保持不变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub tags: Vec<String>,
}

struct JobState {
    definition: JobDefinition,
    task: JobTask,
    tags: Vec<String>,
}

struct JobEntry {
    state: Arc<RwLock<JobState>>,
    running: Arc<AtomicBool>,
    /// 定义更新后唤醒循环，立即按新定义重新计时
    changed: Arc<Notify>,
    cancel: CancellationToken,
}

/// 触发引擎
pub struct Engine {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    root: CancellationToken,
}

impl Engine {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            root,
        }
    }

    /// 注册新作业并启动其触发循环
    pub fn new_job(&self, definition: JobDefinition, task: JobTask, tags: Vec<String>) -> Job {
        let id = Uuid::new_v4();
        let state = Arc::new(RwLock::new(JobState {
            definition,
            task,
            tags: tags.clone(),
        }));
        let running = Arc::new(AtomicBool::new(false));
        let changed = Arc::new(Notify::new());
        let cancel = self.root.child_token();

        let entry = JobEntry {
            state: Arc::clone(&state),
            running: Arc::clone(&running),
            changed: Arc::clone(&changed),
            cancel: cancel.clone(),
        };
        self.jobs.lock().unwrap().insert(id, entry);

        tokio::spawn(job_loop(id, state, running, changed, cancel));
        debug!(job_id = %id, "作业已注册");
        Job { id, tags }
    }

    /// 原地更新作业定义，作业 id 不变
    pub fn update_job(
        &self,
        id: Uuid,
        definition: JobDefinition,
        task: JobTask,
        tags: Vec<String>,
    ) -> Result<Job, EngineError> {
        let jobs = self.jobs.lock().unwrap();
        let entry = jobs.get(&id).ok_or(EngineError::JobNotFound(id))?;
        {
            let mut state = entry.state.write().unwrap();
            state.definition = definition;
            state.task = task;
            state.tags = tags.clone();
        }
        entry.changed.notify_one();
        debug!(job_id = %id, "作业已原地更新");
        Ok(Job { id, tags })
    }

    /// 停止并移除作业
    pub fn remove_job(&self, id: Uuid) -> Result<(), EngineError> {
        let entry = self
            .jobs
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(EngineError::JobNotFound(id))?;
        entry.cancel.cancel();
        debug!(job_id = %id, "作业已移除");
        Ok(())
    }

    /// 枚举当前全部作业
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| Job {
                id: *id,
                tags: entry.state.read().unwrap().tags.clone(),
            })
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.jobs.lock().unwrap().contains_key(&id)
    }
}

/// 单个作业的触发循环
///
/// 每轮按当前定义计算等待时长；更新通知会中断等待并按新定义重算。
/// 触发时若上一轮执行未结束（单例模式），丢弃本次触发。
async fn job_loop(
    id: Uuid,
    state: Arc<RwLock<JobState>>,
    running: Arc<AtomicBool>,
    changed: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let wait = state.read().unwrap().definition.next_wait();

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id = %id, "作业循环退出");
                return;
            }
            _ = changed.notified() => {
                // 定义已更新，重新计时
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(job_id = %id, "上一轮执行未结束，跳过本次触发");
            continue;
        }

        let task = Arc::clone(&state.read().unwrap().task);
        let running_flag = Arc::clone(&running);
        tokio::spawn(async move {
            let fut = (task)();
            fut.await;
            running_flag.store(false, Ordering::SeqCst);
        });
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let jobs = self.jobs.lock().unwrap();
        if !jobs.is_empty() {
            warn!("引擎销毁时仍有 {} 个作业，级联取消", jobs.len());
            for entry in jobs.values() {
                entry.cancel.cancel();
            }
        }
    }
}
