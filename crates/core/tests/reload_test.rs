mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{Behavior, FakeRunner};
use scriptflow_config::load_config;
use scriptflow_core::{NoopMailer, ScriptFlow};
use scriptflow_testing_utils::InMemoryStore;

const CONFIG_V1: &str = r#"
projects:
  - name: Infra
nodes:
  - host: web-1.example.com
    username: deploy
tasks:
  - name: Disk usage
    command: df -h
    schedule: "@every 1h"
    node: web-1-example-com-deploy
    project: infra
    active: true
channels:
  - name: Ops mail
    type: email
    config:
      to: ops@example.com
subscriptions:
  - name: Disk failures
    task: disk-usage
    channel: ops-mail
    events: [error]
    threshold: 1
    active: true
"#;

const CONFIG_V2: &str = r#"
projects:
  - name: Infra
nodes:
  - host: web-1.example.com
    username: deploy
tasks:
  - name: Disk usage
    command: df -h
    schedule: "@every 1h"
    node: web-1-example-com-deploy
    project: infra
    active: false
  - name: Memory usage
    command: free -m
    schedule: "@every 2h"
    node: web-1-example-com-deploy
    project: infra
    active: true
"#;

struct ReloadHarness {
    sf: Arc<ScriptFlow>,
    config_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn reload_harness(initial: &str) -> ReloadHarness {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("scriptflow.yml");
    std::fs::File::create(&config_path)
        .unwrap()
        .write_all(initial.as_bytes())
        .unwrap();

    let store = InMemoryStore::new();
    let sf = ScriptFlow::new(
        store.entity_store(),
        FakeRunner::new(Behavior::Succeed(vec![])),
        dir.path().join("sf_logs"),
        load_config(&config_path).unwrap(),
        Some(config_path.clone()),
        Arc::new(NoopMailer),
        CancellationToken::new(),
    );
    ReloadHarness {
        sf,
        config_path,
        _dir: dir,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_update_from_config_populates_store() {
    let harness = reload_harness(CONFIG_V1);
    harness.sf.update_from_config().await.unwrap();
    let store = harness.sf.store().clone();

    assert!(store.projects.get_by_id("infra").await.unwrap().is_some());
    let node = store
        .nodes
        .get_by_id("web-1-example-com-deploy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.host, "web-1.example.com");
    let task = store.tasks.get_by_id("disk-usage").await.unwrap().unwrap();
    assert!(task.active);
    assert!(store.channels.get_by_id("ops-mail").await.unwrap().is_some());
    let sub = store
        .subscriptions
        .get_by_id("disk-failures")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.threshold, 1);
}

#[tokio::test]
async fn test_reload_reschedules_tasks() {
    let harness = reload_harness(CONFIG_V1);
    harness.sf.update_from_config().await.unwrap();
    harness.sf.schedule_active_tasks().await;
    settle().await;
    assert_eq!(harness.sf.active_job_ids(), vec!["disk-usage".to_string()]);

    // 配置翻转：disk-usage 停用，memory-usage 新增
    std::fs::write(&harness.config_path, CONFIG_V2).unwrap();
    harness.sf.reload().await.unwrap();
    settle().await;

    let mut job_ids = harness.sf.active_job_ids();
    job_ids.sort();
    assert_eq!(job_ids, vec!["memory-usage".to_string()]);
}

#[tokio::test]
async fn test_reload_with_broken_config_fails() {
    let harness = reload_harness(CONFIG_V1);
    harness.sf.update_from_config().await.unwrap();

    std::fs::write(&harness.config_path, "tasks: [broken").unwrap();
    assert!(harness.sf.reload().await.is_err());

    // 旧配置仍然生效
    let config = harness.sf.config();
    assert_eq!(config.tasks.len(), 1);
    assert_eq!(config.tasks[0].name, "Disk usage");
}
