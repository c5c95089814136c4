mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use common::{Behavior, Harness};
use scriptflow_domain::{ChannelKind, RunStatus};
use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};
use scriptflow_testing_utils::{channel, project, subscription, task};

/// 捕获外发邮件的假 Mailer
#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: Mutex<bool>,
}

#[async_trait]
impl scriptflow_core::Mailer for CapturingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> ScriptFlowResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(ScriptFlowError::NotificationSend("smtp down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

async fn seed_email_pipeline(harness: &Harness) -> String {
    let entity_store = harness.sf.store().clone();
    entity_store.projects.upsert(&project("p1")).await.unwrap();
    entity_store
        .tasks
        .upsert(&task("t1", "echo hello", "@every 1s", "n1"))
        .await
        .unwrap();
    entity_store
        .channels
        .upsert(&channel("c1", ChannelKind::Email))
        .await
        .unwrap();
    entity_store
        .subscriptions
        .upsert(&subscription("s1", "t1", vec![RunStatus::Error], 1))
        .await
        .unwrap();

    let run = harness.store.push_run_at("t1", RunStatus::Error, Utc::now());
    harness.sf.process_run_notification(&run).await;
    run.id
}

#[tokio::test]
async fn test_send_email_notification_marks_sent() {
    let mailer = Arc::new(CapturingMailer::default());
    let harness = Harness::with_mailer(Behavior::Succeed(vec![]), mailer.clone());
    let run_id = seed_email_pipeline(&harness).await;

    harness.sf.job_send_notifications().await;

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (to, subject, body) = &sent[0];
    assert_eq!(to, "ops@example.com");
    // 主题形如 [<app>] <<sub>> <status>
    assert!(subject.contains("[ScriptFlow]"));
    assert!(subject.contains("<s1>"));
    assert!(subject.contains("error"));
    assert!(body.contains("echo hello"));
    assert!(body.contains(&run_id));
    drop(sent);

    let entity_store = harness.sf.store().clone();
    assert!(entity_store.notifications.next_unsent(3).await.unwrap().is_none());
}

#[tokio::test]
async fn test_send_failure_bumps_error_count_until_cap() {
    let mailer = Arc::new(CapturingMailer::default());
    *mailer.fail.lock().unwrap() = true;
    let harness = Harness::with_mailer(Behavior::Succeed(vec![]), mailer.clone());
    seed_email_pipeline(&harness).await;

    let entity_store = harness.sf.store().clone();
    // 每轮失败递增 error_count；超过上限后该通知不再被选中
    for _ in 0..5 {
        harness.sf.job_send_notifications().await;
    }
    assert!(entity_store.notifications.next_unsent(3).await.unwrap().is_none());

    // 恢复后也不会重试（错误计数已封顶），通知保持 sent=false
    *mailer.fail.lock().unwrap() = false;
    harness.sf.job_send_notifications().await;
    assert!(mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_noop_without_pending_notifications() {
    let mailer = Arc::new(CapturingMailer::default());
    let harness = Harness::with_mailer(Behavior::Succeed(vec![]), mailer.clone());
    harness.sf.job_send_notifications().await;
    assert!(mailer.sent.lock().unwrap().is_empty());
}
