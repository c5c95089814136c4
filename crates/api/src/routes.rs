use std::sync::{Arc, Mutex};

use axum::{
    routing::{get, post},
    Router,
};

use scriptflow_core::ScriptFlow;

use crate::auth::AuthOracle;
use crate::handlers;

/// API 共享状态
#[derive(Clone)]
pub struct AppState {
    pub sf: Arc<ScriptFlow>,
    pub auth: Arc<dyn AuthOracle>,
    /// 打开的实时日志通道计数
    pub open_channels: Arc<Mutex<i32>>,
}

impl AppState {
    pub fn new(sf: Arc<ScriptFlow>, auth: Arc<dyn AuthOracle>) -> Self {
        Self {
            sf,
            auth,
            open_channels: Arc::new(Mutex::new(0)),
        }
    }
}

/// 组装 API 路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/scriptflow/task/:task_id/log-ws",
            get(handlers::logs::task_log_ws),
        )
        .route(
            "/api/scriptflow/run/:run_id/log",
            get(handlers::logs::run_log),
        )
        .route(
            "/api/scriptflow/run/:run_id/kill",
            post(handlers::runs::kill_run),
        )
        .route(
            "/api/scriptflow/runs/latest",
            get(handlers::runs::latest_runs),
        )
        .route("/api/scriptflow/stats", get(handlers::stats::stats))
        .with_state(state)
}
