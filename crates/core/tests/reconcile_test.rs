mod common;

use std::time::Duration;

use common::{Behavior, Harness};
use scriptflow_testing_utils::task;

async fn settle() {
    // 对账里补调度是并发进行的，给它们让出调度器
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_reconcile_restores_store_map_agreement() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let entity_store = harness.sf.store().clone();

    // 预置映射：{a, b}；存储活跃任务：{b, c}
    let task_a = task("task-a", "echo a", "@every 1h", "n1");
    let task_b = task("task-b", "echo b", "@every 1h", "n1");
    let task_c = task("task-c", "echo c", "@every 1h", "n1");

    entity_store.tasks.upsert(&task_a).await.unwrap();
    entity_store.tasks.upsert(&task_b).await.unwrap();
    harness.sf.schedule_task(&task_a).await;
    harness.sf.schedule_task(&task_b).await;

    entity_store.tasks.delete("task-a").await.unwrap();
    entity_store.tasks.upsert(&task_c).await.unwrap();

    harness.sf.reconcile_jobs().await;
    settle().await;

    let mut job_ids = harness.sf.active_job_ids();
    job_ids.sort();
    assert_eq!(job_ids, vec!["task-b".to_string(), "task-c".to_string()]);

    // 引擎里每个映射项恰好一个非系统触发器
    let engine_jobs = harness.sf.engine_jobs();
    assert_eq!(engine_jobs.len(), 2);
    for task_id in ["task-b", "task-c"] {
        let job = harness.sf.active_job(task_id).unwrap();
        assert!(engine_jobs.iter().any(|j| j.id == job.id));
    }
}

#[tokio::test]
async fn test_reconcile_twice_is_idempotent() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let entity_store = harness.sf.store().clone();

    let task_a = task("task-a", "echo a", "@every 1h", "n1");
    let task_b = task("task-b", "echo b", "@every 1h", "n1");
    entity_store.tasks.upsert(&task_a).await.unwrap();
    entity_store.tasks.upsert(&task_b).await.unwrap();

    harness.sf.reconcile_jobs().await;
    settle().await;

    let jobs_after_first: Vec<_> = {
        let mut ids: Vec<_> = harness
            .sf
            .active_job_ids()
            .into_iter()
            .map(|task_id| (task_id.clone(), harness.sf.active_job(&task_id).unwrap().id))
            .collect();
        ids.sort();
        ids
    };
    assert_eq!(jobs_after_first.len(), 2);

    // 第二次对账不应产生任何变更：映射与作业 id 均保持不变
    harness.sf.reconcile_jobs().await;
    settle().await;

    let jobs_after_second: Vec<_> = {
        let mut ids: Vec<_> = harness
            .sf
            .active_job_ids()
            .into_iter()
            .map(|task_id| (task_id.clone(), harness.sf.active_job(&task_id).unwrap().id))
            .collect();
        ids.sort();
        ids
    };
    assert_eq!(jobs_after_first, jobs_after_second);
    assert_eq!(harness.sf.engine_jobs().len(), 2);
}

#[tokio::test]
async fn test_reconcile_schedules_missing_tasks() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let entity_store = harness.sf.store().clone();

    entity_store
        .tasks
        .upsert(&task("task-a", "echo a", "@every 1h", "n1"))
        .await
        .unwrap();
    assert!(harness.sf.active_job_ids().is_empty());

    harness.sf.reconcile_jobs().await;
    settle().await;

    assert_eq!(harness.sf.active_job_ids(), vec!["task-a".to_string()]);
}

#[tokio::test]
async fn test_reconcile_drops_unschedulable_stale_entries() {
    let harness = Harness::new(Behavior::Succeed(vec![]));
    let entity_store = harness.sf.store().clone();

    // 任务先被调度然后从存储消失
    let ghost = task("ghost-task", "echo x", "@every 1h", "n1");
    entity_store.tasks.upsert(&ghost).await.unwrap();
    harness.sf.schedule_task(&ghost).await;
    entity_store.tasks.delete("ghost-task").await.unwrap();

    harness.sf.reconcile_jobs().await;
    settle().await;

    assert!(harness.sf.active_job_ids().is_empty());
    assert!(harness.sf.engine_jobs().is_empty());
}
