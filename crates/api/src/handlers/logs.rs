use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use scriptflow_logs::{extract_logs_for_run, read_last_lines, LogWatcher};

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

/// 认证首帧的等待上限
const AUTH_TIMEOUT: Duration = Duration::from_secs(3);
/// 历史回放行数
const HISTORY_LINES: usize = 100;

#[derive(Debug, Deserialize)]
struct AuthMessage {
    #[serde(default)]
    token: String,
}

/// 打开通道计数的退出守卫
struct ChannelGuard {
    counter: Arc<Mutex<i32>>,
}

impl ChannelGuard {
    fn new(counter: Arc<Mutex<i32>>) -> Self {
        *counter.lock().unwrap() += 1;
        Self { counter }
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        *self.counter.lock().unwrap() -= 1;
    }
}

/// GET /api/scriptflow/task/{taskId}/log-ws
///
/// websocket 不带 HTTP 头认证，令牌在升级后的第一帧里带进来。
pub async fn task_log_ws(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_log_socket(state, task_id, socket))
}

async fn handle_log_socket(state: AppState, task_id: String, mut socket: WebSocket) {
    if !authenticate_socket(&state, &task_id, &mut socket).await {
        return;
    }

    let _guard = ChannelGuard::new(Arc::clone(&state.open_channels));

    // 定位今天的日志文件
    let log_file_path = state.sf.log_store().task_today_log_file_path(&task_id);
    debug!(task_id, file = %log_file_path.display(), "实时日志通道已认证");
    if !log_file_path.exists() {
        let _ = socket
            .send(Message::Text("Log file not found".to_string()))
            .await;
        return;
    }

    // 历史：最后 100 行，每行一帧
    let lines = match read_last_lines(&log_file_path, HISTORY_LINES) {
        Ok(lines) => lines,
        Err(e) => {
            error!(task_id, "读取日志历史失败: {e}");
            return;
        }
    };
    for line in lines {
        if socket.send(Message::Text(format!("{line}\n"))).await.is_err() {
            return;
        }
    }

    // 跟踪：监视器只投递注册之后新增的字节
    let mut watcher = match LogWatcher::watch(&log_file_path) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!(task_id, "注册日志监视器失败: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                // 客户端断开
                None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            chunk = watcher.next_chunk() => match chunk {
                Some(Ok(chunk)) => {
                    for line in chunk.split_inclusive('\n') {
                        if socket.send(Message::Text(line.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(task_id, "日志监视器故障: {e}");
                    return;
                }
                None => return,
            }
        }
    }
}

/// 等待并校验首帧令牌
async fn authenticate_socket(state: &AppState, task_id: &str, socket: &mut WebSocket) -> bool {
    let first = tokio::time::timeout(AUTH_TIMEOUT, socket.recv()).await;

    let message = match first {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            warn!(task_id, "websocket认证失败: 未收到认证帧");
            let _ = socket
                .send(Message::Text(
                    json!({"status": "error", "message": "Authentication required"}).to_string(),
                ))
                .await;
            return false;
        }
    };

    let auth: AuthMessage = match serde_json::from_str(&message) {
        Ok(auth) => auth,
        Err(_) => {
            warn!(task_id, "websocket认证失败: 认证帧格式非法");
            let _ = socket
                .send(Message::Text(
                    json!({"status": "error", "message": "Authentication required"}).to_string(),
                ))
                .await;
            return false;
        }
    };

    if auth.token.is_empty() || !state.auth.validate_token(&auth.token).await {
        warn!(task_id, "websocket认证失败: 令牌无效");
        let _ = socket
            .send(Message::Text(
                json!({"status": "error", "message": "Invalid authentication token"}).to_string(),
            ))
            .await;
        return false;
    }
    true
}

/// GET /api/scriptflow/run/{runId}/log
///
/// 从运行记录创建日期对应的日志文件里提取该次运行的输出。
pub async fn run_log(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.sf.store();

    let run = store
        .runs
        .get_by_id(&run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("运行记录未找到: {run_id}")))?;
    let task = store
        .tasks
        .get_by_id(&run.task)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("任务未找到: {}", run.task)))?;

    let log_file_path = state
        .sf
        .log_store()
        .task_log_file_path(&task.id, run.created);
    let logs = extract_logs_for_run(&log_file_path, &run_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({ "logs": logs })))
}
