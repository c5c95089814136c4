use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use scriptflow_api::{create_app, AppState, StaticTokenOracle};
use scriptflow_config::{load_config, Config};
use scriptflow_core::{NoopMailer, ScriptFlow};
use scriptflow_infrastructure::Store;
use scriptflow_ssh::{Pool, PoolConfig};
use tokio_util::sync::CancellationToken;

use crate::pidfile;

/// 主应用程序
pub struct Application {
    sf: Arc<ScriptFlow>,
    data_dir: PathBuf,
    bind_address: String,
}

impl Application {
    pub async fn new(data_dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("创建数据目录失败: {}", data_dir.display()))?;

        let config = match &config_path {
            Some(path) => load_config(path)
                .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
            None => Config::default(),
        };
        let bind_address = config.settings.bind_address.clone();

        // 打开嵌入式存储
        let database_path = data_dir.join("scriptflow.db");
        let store = Store::open(&format!("sqlite://{}", database_path.display()))
            .await
            .context("打开数据库失败")?;
        info!("数据库已打开: {}", database_path.display());

        // SSH 连接池，默认私钥 ~/.ssh/id_rsa
        let home_dir = dirs::home_dir().context("无法确定用户主目录")?;
        let pool = Pool::new(PoolConfig::new(home_dir.join(".ssh").join("id_rsa")));

        // 日志目录与数据目录平级
        let logs_dir = data_dir.join("..").join("sf_logs");

        let root = CancellationToken::new();
        let sf = ScriptFlow::new(
            store.entity_store(),
            Arc::new(pool),
            logs_dir,
            config,
            config_path,
            Arc::new(NoopMailer),
            root,
        );

        Ok(Self {
            sf,
            data_dir,
            bind_address,
        })
    }

    /// 运行至收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.sf.start().await.context("核心引擎启动失败")?;

        // API 服务器
        let auth_token = self.sf.config().settings.auth_token.clone();
        let state = AppState::new(
            Arc::clone(&self.sf),
            Arc::new(StaticTokenOracle::new(auth_token)),
        );
        let app = create_app(state);
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.bind_address))?;
        info!("API服务器启动在 http://{}", self.bind_address);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("API服务器运行失败: {e}");
            }
        });

        // PID 文件与 SIGHUP 重载
        pidfile::create_pid_file(&self.data_dir).context("创建PID文件失败")?;
        self.setup_reload_signal_handler();

        // 等待关闭信号
        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        self.sf.terminate().await;
        server_handle.abort();
        pidfile::remove_pid_file(&self.data_dir);

        info!("应用已停止");
        Ok(())
    }

    /// SIGHUP 触发配置重载
    fn setup_reload_signal_handler(&self) {
        let sf = Arc::clone(&self.sf);
        tokio::spawn(async move {
            let mut hangup = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::hangup(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("安装SIGHUP信号处理器失败: {e}");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = sf.root_token().cancelled() => {
                        info!("信号处理器退出");
                        return;
                    }
                    received = hangup.recv() => {
                        if received.is_none() {
                            return;
                        }
                        if let Err(e) = sf.reload().await {
                            error!("配置重载失败: {e}");
                        }
                    }
                }
            }
        });
    }
}
