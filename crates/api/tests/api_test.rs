use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use scriptflow_api::{create_app, AppState, StaticTokenOracle};
use scriptflow_config::Config;
use scriptflow_core::{NoopMailer, ScriptFlow};
use scriptflow_domain::{NewRun, RunStatus};
use scriptflow_ssh::{OutputCallback, RemoteRunner, RunResult, SshConfig};
use scriptflow_testing_utils::{node, task, InMemoryStore};

struct IdleRunner;

#[async_trait]
impl RemoteRunner for IdleRunner {
    async fn run_context(
        &self,
        _ctx: CancellationToken,
        _cfg: &SshConfig,
        _command: &str,
        _on_stdout: OutputCallback,
        _on_stderr: OutputCallback,
    ) -> RunResult {
        Ok(0)
    }

    async fn run_combined_context(
        &self,
        _ctx: CancellationToken,
        _cfg: &SshConfig,
        _command: &str,
        _on_output: OutputCallback,
    ) -> RunResult {
        Ok(0)
    }

    fn put(&self, _host: &str) {}
}

struct ApiHarness {
    app: axum::Router,
    store: InMemoryStore,
    sf: Arc<ScriptFlow>,
    _logs_dir: tempfile::TempDir,
}

fn api_harness() -> ApiHarness {
    let store = InMemoryStore::new();
    let logs_dir = tempfile::tempdir().unwrap();
    let sf = ScriptFlow::new(
        store.entity_store(),
        Arc::new(IdleRunner),
        logs_dir.path().to_path_buf(),
        Config::default(),
        None,
        Arc::new(NoopMailer),
        CancellationToken::new(),
    );
    let state = AppState::new(Arc::clone(&sf), Arc::new(StaticTokenOracle::new("secret")));
    ApiHarness {
        app: create_app(state),
        store,
        sf,
        _logs_dir: logs_dir,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_stats_starts_at_zero() {
    let harness = api_harness();
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/api/scriptflow/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["WebSocketsCount"], 0);
}

#[tokio::test]
async fn test_kill_unknown_run_returns_404() {
    let harness = api_harness();
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scriptflow/run/missing/kill")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_latest_runs_without_param_is_empty() {
    let harness = api_harness();
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/api/scriptflow/runs/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({}));
}

#[tokio::test]
async fn test_latest_runs_maps_task_to_run() {
    let harness = api_harness();
    let entity_store = harness.sf.store().clone();

    let _old = entity_store
        .runs
        .create(&NewRun {
            task: "t1".to_string(),
            host: "web-1".to_string(),
            command: "echo a".to_string(),
        })
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let newer = entity_store
        .runs
        .create(&NewRun {
            task: "t1".to_string(),
            host: "web-1".to_string(),
            command: "echo b".to_string(),
        })
        .await
        .unwrap();

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/api/scriptflow/runs/latest?taskIds=t1,t2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["t1"]["id"], newer.id.as_str());
    assert!(json.get("t2").is_none());
}

#[tokio::test]
async fn test_run_log_extracts_lines() {
    let harness = api_harness();
    let entity_store = harness.sf.store().clone();
    entity_store
        .nodes
        .upsert(&node("n1", "web-1", scriptflow_domain::NodeStatus::Online))
        .await
        .unwrap();
    entity_store
        .tasks
        .upsert(&task("t1", "echo hello", "@every 1h", "n1"))
        .await
        .unwrap();
    let run = entity_store
        .runs
        .create(&NewRun {
            task: "t1".to_string(),
            host: "web-1".to_string(),
            command: "echo hello".to_string(),
        })
        .await
        .unwrap();
    entity_store
        .runs
        .set_outcome(&run.id, &scriptflow_domain::RunOutcome::completed(0))
        .await
        .unwrap();

    // 手工写日志文件：分隔行 + 两行输出 + 下一次运行的分隔行
    let log_path = harness
        .sf
        .log_store()
        .task_log_file_path("t1", run.created);
    std::fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    let mut file = std::fs::File::create(&log_path).unwrap();
    writeln!(file, "[2024-01-01T00:00:00Z] [scriptflow] run {}", run.id).unwrap();
    writeln!(file, "hello").unwrap();
    writeln!(file, "world").unwrap();
    writeln!(file, "[2024-01-01T00:01:00Z] [scriptflow] run other").unwrap();
    writeln!(file, "not ours").unwrap();

    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/api/scriptflow/run/{}/log", run.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let logs = json["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[1], "hello");
    assert_eq!(logs[2], "world");
}

#[tokio::test]
async fn test_run_log_unknown_run_returns_404() {
    let harness = api_harness();
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/api/scriptflow/run/missing/log")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_kill_requires_registered_run() {
    let harness = api_harness();

    // 运行记录存在但没有在途登记，kill 仍是 404
    let run = harness
        .store
        .push_run_at("t1", RunStatus::Started, chrono::Utc::now());
    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/scriptflow/run/{}/kill", run.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
