mod common;

use common::{Behavior, Harness};
use scriptflow_testing_utils::task;

#[tokio::test]
async fn test_schedule_task_inserts_job() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let t1 = task("t1", "echo hello", "@every 1h", "n1");

    harness.sf.schedule_task(&t1).await;

    assert_eq!(harness.sf.active_job_ids(), vec!["t1".to_string()]);
    let jobs = harness.sf.engine_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].tags, vec!["t1".to_string()]);
}

#[tokio::test]
async fn test_schedule_task_twice_updates_in_place() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let mut t1 = task("t1", "echo hello", "@every 1h", "n1");

    harness.sf.schedule_task(&t1).await;
    let before = harness.sf.active_job(&t1.id).unwrap();

    t1.schedule = "30 2 * * *".to_string();
    harness.sf.schedule_task(&t1).await;
    let after = harness.sf.active_job(&t1.id).unwrap();

    // 原地更新：映射仍是单条，作业 id 不变
    assert_eq!(harness.sf.active_job_ids().len(), 1);
    assert_eq!(before.id, after.id);
    assert_eq!(harness.sf.engine_jobs().len(), 1);
}

#[tokio::test]
async fn test_schedule_inactive_task_removes_job() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let mut t1 = task("t1", "echo hello", "@every 1h", "n1");

    harness.sf.schedule_task(&t1).await;
    assert_eq!(harness.sf.active_job_ids().len(), 1);

    t1.active = false;
    harness.sf.schedule_task(&t1).await;
    assert!(harness.sf.active_job_ids().is_empty());
    assert!(harness.sf.engine_jobs().is_empty());
}

#[tokio::test]
async fn test_schedule_inactive_absent_task_is_noop() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let mut t1 = task("t1", "echo hello", "@every 1h", "n1");
    t1.active = false;
    harness.sf.schedule_task(&t1).await;
    assert!(harness.sf.active_job_ids().is_empty());
}

#[tokio::test]
async fn test_schedule_task_with_hashed_cron() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let t1 = task("t1", "echo hello", "H H * * *", "n1");
    harness.sf.schedule_task(&t1).await;
    assert_eq!(harness.sf.active_job_ids().len(), 1);
}

#[tokio::test]
async fn test_schedule_invalid_range_not_scheduled() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let t1 = task("t1", "echo hello", "H(30-10) * * * *", "n1");
    harness.sf.schedule_task(&t1).await;
    // 校验失败的任务不进映射
    assert!(harness.sf.active_job_ids().is_empty());
    assert!(harness.sf.engine_jobs().is_empty());
}

#[tokio::test]
async fn test_schedule_invalid_cron_not_scheduled() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let t1 = task("t1", "echo hello", "not a schedule", "n1");
    harness.sf.schedule_task(&t1).await;
    assert!(harness.sf.active_job_ids().is_empty());
}

#[tokio::test]
async fn test_schedule_bad_every_duration_not_scheduled() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let t1 = task("t1", "echo hello", "@every banana", "n1");
    harness.sf.schedule_task(&t1).await;
    assert!(harness.sf.active_job_ids().is_empty());
}
