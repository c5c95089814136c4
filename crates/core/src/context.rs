use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scriptflow_config::Config;
use scriptflow_domain::EntityStore;
use scriptflow_engine::{Engine, Job};
use scriptflow_logs::LogStore;
use scriptflow_ssh::RemoteRunner;

use crate::notification::Mailer;

/// 进程级核心上下文
///
/// 锁的嵌套顺序固定为 reload > config > jobs；schedule_task 锁
/// 在持有期间不再获取其他锁。jobs/runs/config 三把读写锁都不跨 I/O 持有。
pub struct ScriptFlow {
    pub(crate) store: EntityStore,
    pub(crate) pool: Arc<dyn RemoteRunner>,
    pub(crate) engine: Engine,
    pub(crate) log_store: LogStore,
    pub(crate) root: CancellationToken,

    /// taskId → 触发器句柄，由调度器独占维护
    pub(crate) active_jobs: RwLock<HashMap<String, Job>>,
    /// runId → 取消令牌，执行器退出时移除
    pub(crate) active_runs: RwLock<HashMap<String, CancellationToken>>,

    /// 当前声明式配置指针，重载失败时原子回滚
    pub(crate) config: RwLock<Arc<Config>>,
    pub(crate) config_file_path: Option<PathBuf>,
    /// 整个重载过程串行化
    pub(crate) reload_lock: Mutex<()>,
    /// 单次 schedule_task 全程持有，串行化触发器变更
    pub(crate) schedule_task_lock: Mutex<()>,

    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) http: reqwest::Client,
}

impl ScriptFlow {
    pub fn new(
        store: EntityStore,
        pool: Arc<dyn RemoteRunner>,
        logs_dir: PathBuf,
        config: Config,
        config_file_path: Option<PathBuf>,
        mailer: Arc<dyn Mailer>,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pool,
            engine: Engine::new(root.child_token()),
            log_store: LogStore::new(logs_dir),
            root,
            active_jobs: RwLock::new(HashMap::new()),
            active_runs: RwLock::new(HashMap::new()),
            config: RwLock::new(Arc::new(config)),
            config_file_path,
            reload_lock: Mutex::new(()),
            schedule_task_lock: Mutex::new(()),
            mailer,
            http: reqwest::Client::new(),
        })
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn log_store(&self) -> &LogStore {
        &self.log_store
    }

    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().unwrap())
    }

    /// 启动核心引擎
    ///
    /// 顺序：日志目录 → 配置同步 → 残留运行标记中断 → 系统作业 →
    /// 已有任务调度 → 事件路由。
    pub async fn start(self: &Arc<Self>) -> scriptflow_errors::ScriptFlowResult<()> {
        std::fs::create_dir_all(self.log_store.logs_dir()).map_err(|e| {
            scriptflow_errors::ScriptFlowError::internal(format!("创建日志根目录失败: {e}"))
        })?;

        if self.config_file_path.is_some() {
            if let Err(e) = self.update_from_config().await {
                error!("启动时从配置同步存储失败: {e}");
            }
        }

        self.mark_all_running_tasks_as_interrupted("app-started").await;
        self.schedule_system_tasks();
        self.schedule_active_tasks().await;
        self.start_event_router();

        info!("核心引擎已启动");
        Ok(())
    }

    /// 进程退出：取消根令牌并把在途运行标记为中断，不等待收尾
    pub async fn terminate(&self) {
        info!("核心引擎开始关闭");
        self.root.cancel();
        self.mark_all_running_tasks_as_interrupted("app-terminated").await;
    }

    pub(crate) async fn mark_all_running_tasks_as_interrupted(&self, message: &str) {
        match self.store.runs.mark_started_as_interrupted(message).await {
            Ok(0) => {}
            Ok(affected) => info!("已将 {affected} 条在途运行标记为中断"),
            Err(e) => error!("标记在途运行为中断失败: {e}"),
        }
    }

    /// 调度存储中的全部活跃任务，每个任务独立并发调度
    pub async fn schedule_active_tasks(self: &Arc<Self>) {
        let tasks = match self.store.tasks.get_active_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("查询活跃任务失败: {e}");
                return;
            }
        };
        for task in tasks {
            let sf = Arc::clone(self);
            tokio::spawn(async move {
                sf.schedule_task(&task).await;
            });
        }
    }

    // 作业映射维护

    pub(crate) fn get_active_job(&self, task_id: &str) -> Option<Job> {
        self.active_jobs.read().unwrap().get(task_id).cloned()
    }

    pub(crate) fn set_active_job(&self, task_id: &str, job: Job) {
        self.active_jobs
            .write()
            .unwrap()
            .insert(task_id.to_string(), job);
    }

    pub(crate) fn remove_active_job(&self, task_id: &str) {
        self.active_jobs.write().unwrap().remove(task_id);
    }

    /// 当前作业映射快照（测试与对账用）
    pub fn active_job_ids(&self) -> Vec<String> {
        self.active_jobs.read().unwrap().keys().cloned().collect()
    }

    /// 引擎当前全部作业快照
    pub fn engine_jobs(&self) -> Vec<Job> {
        self.engine.jobs()
    }

    /// 某任务在映射中的触发器句柄
    pub fn active_job(&self, task_id: &str) -> Option<Job> {
        self.get_active_job(task_id)
    }

    // 在途运行维护

    pub(crate) fn register_active_run(&self, run_id: &str, cancel: CancellationToken) {
        self.active_runs
            .write()
            .unwrap()
            .insert(run_id.to_string(), cancel);
    }

    pub(crate) fn unregister_active_run(&self, run_id: &str) {
        self.active_runs.write().unwrap().remove(run_id);
    }

    pub fn has_active_run(&self, run_id: &str) -> bool {
        self.active_runs.read().unwrap().contains_key(run_id)
    }
}
