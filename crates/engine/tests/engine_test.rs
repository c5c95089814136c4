use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scriptflow_engine::{Engine, JobDefinition, JobTask};

fn counting_task(counter: Arc<AtomicUsize>) -> JobTask {
    Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    })
}

#[test]
fn test_cron_definition_accepts_five_fields() {
    assert!(JobDefinition::cron("39 * * * *").is_ok());
    assert!(JobDefinition::cron("0 39 * * * *").is_ok());
    assert!(JobDefinition::cron("not a cron").is_err());
}

#[test]
fn test_random_duration_validation() {
    let ok = JobDefinition::random_duration(Duration::from_secs(9), Duration::from_secs(11));
    assert!(ok.is_ok());
    let bad = JobDefinition::random_duration(Duration::from_secs(11), Duration::from_secs(9));
    assert!(bad.is_err());
    let zero = JobDefinition::random_duration(Duration::ZERO, Duration::ZERO);
    assert!(zero.is_err());
}

#[tokio::test]
async fn test_job_fires_on_interval() {
    let engine = Engine::new(CancellationToken::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let def =
        JobDefinition::random_duration(Duration::from_millis(20), Duration::from_millis(20))
            .unwrap();
    engine.new_job(def, counting_task(Arc::clone(&counter)), vec!["t1".to_string()]);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(counter.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_update_job_keeps_id() {
    let engine = Engine::new(CancellationToken::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let def = JobDefinition::cron("0 0 1 1 *").unwrap();
    let job = engine.new_job(def, counting_task(Arc::clone(&counter)), vec!["t1".to_string()]);

    let new_def = JobDefinition::cron("30 2 * * *").unwrap();
    let updated = engine
        .update_job(job.id, new_def, counting_task(counter), vec!["t1".to_string()])
        .unwrap();

    assert_eq!(job.id, updated.id);
    assert_eq!(engine.jobs().len(), 1);
    assert_eq!(engine.jobs()[0].id, job.id);
}

#[tokio::test]
async fn test_remove_job() {
    let engine = Engine::new(CancellationToken::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let def = JobDefinition::cron("0 0 1 1 *").unwrap();
    let job = engine.new_job(def, counting_task(counter), vec!["t1".to_string()]);

    engine.remove_job(job.id).unwrap();
    assert!(engine.jobs().is_empty());
    assert!(engine.remove_job(job.id).is_err());
}

#[tokio::test]
async fn test_jobs_carry_tags() {
    let engine = Engine::new(CancellationToken::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let def = JobDefinition::cron("0 0 1 1 *").unwrap();
    engine.new_job(
        def,
        counting_task(counter),
        vec!["system-task".to_string(), "check-node-status".to_string()],
    );

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].tags.contains(&"system-task".to_string()));
}

#[tokio::test]
async fn test_singleton_skips_overlapping_ticks() {
    let engine = Engine::new(CancellationToken::new());
    let started = Arc::new(AtomicUsize::new(0));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));

    let task: JobTask = {
        let started = Arc::clone(&started);
        let concurrent = Arc::clone(&concurrent);
        let max_concurrent = Arc::clone(&max_concurrent);
        Arc::new(move || {
            let started = Arc::clone(&started);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                // 执行时间远超触发间隔，迫使后续触发被跳过
                tokio::time::sleep(Duration::from_millis(120)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            })
        })
    };

    let def =
        JobDefinition::random_duration(Duration::from_millis(20), Duration::from_millis(20))
            .unwrap();
    engine.new_job(def, task, vec!["slow".to_string()]);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(max_concurrent.load(Ordering::SeqCst) <= 1);
    // 至少触发过两轮，但远少于无跳过时的约 20 次
    let fired = started.load(Ordering::SeqCst);
    assert!(fired >= 2 && fired <= 5, "fired = {fired}");
}

#[tokio::test]
async fn test_root_cancellation_stops_jobs() {
    let root = CancellationToken::new();
    let engine = Engine::new(root.clone());
    let counter = Arc::new(AtomicUsize::new(0));
    let def =
        JobDefinition::random_duration(Duration::from_millis(20), Duration::from_millis(20))
            .unwrap();
    engine.new_job(def, counting_task(Arc::clone(&counter)), vec![]);

    tokio::time::sleep(Duration::from_millis(60)).await;
    root.cancel();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let after_cancel = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
}
