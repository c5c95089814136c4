use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use scriptflow_domain::{
    Channel, ChannelRepository, EntityStore, NewRun, Node, NodeRepository, NodeStatus,
    Notification, NotificationRepository, Project, ProjectRepository, RecordEvent, Run,
    RunOutcome, RunRepository, RunStatus, Subscription, SubscriptionRepository, Task,
    TaskRepository,
};
use scriptflow_errors::ScriptFlowResult;

#[derive(Default)]
struct State {
    projects: HashMap<String, Project>,
    nodes: HashMap<String, Node>,
    tasks: HashMap<String, Task>,
    runs: Vec<Run>,
    channels: HashMap<String, Channel>,
    subscriptions: HashMap<String, Subscription>,
    notifications: Vec<Notification>,
    next_id: u64,
}

impl State {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// 内存版实体存储
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    events_tx: broadcast::Sender<RecordEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events_tx,
        }
    }

    pub fn entity_store(&self) -> EntityStore {
        EntityStore::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            self.events_tx.clone(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events_tx.subscribe()
    }

    /// 直接写入一条运行记录（测试回填历史时指定 created）
    pub fn push_run(&self, run: Run) {
        self.state.lock().unwrap().runs.push(run);
    }

    /// 构造一条指定状态与时间的运行记录并写入
    pub fn push_run_at(
        &self,
        task_id: &str,
        status: RunStatus,
        created: DateTime<Utc>,
    ) -> Run {
        let id = self.state.lock().unwrap().new_id("r");
        let run = Run {
            id,
            task: task_id.to_string(),
            host: "web-1".to_string(),
            command: "echo hello".to_string(),
            status,
            exit_code: None,
            connection_error: None,
            created,
            updated: created,
        };
        self.push_run(run.clone());
        run
    }

    fn emit(&self, event: RecordEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn upsert(&self, project: &Project) -> ScriptFlowResult<()> {
        self.state
            .lock()
            .unwrap()
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Project>> {
        Ok(self.state.lock().unwrap().projects.get(id).cloned())
    }

    async fn list(&self) -> ScriptFlowResult<Vec<Project>> {
        Ok(self.state.lock().unwrap().projects.values().cloned().collect())
    }
}

#[async_trait]
impl NodeRepository for InMemoryStore {
    async fn upsert(&self, node: &Node) -> ScriptFlowResult<()> {
        let existing = {
            let mut state = self.state.lock().unwrap();
            state.nodes.insert(node.id.clone(), node.clone()).is_some()
        };
        if existing {
            self.emit(RecordEvent::NodeUpdated { node: node.clone() });
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Node>> {
        Ok(self.state.lock().unwrap().nodes.get(id).cloned())
    }

    async fn list(&self) -> ScriptFlowResult<Vec<Node>> {
        Ok(self.state.lock().unwrap().nodes.values().cloned().collect())
    }

    async fn update_status(&self, id: &str, status: NodeStatus) -> ScriptFlowResult<()> {
        if let Some(node) = self.state.lock().unwrap().nodes.get_mut(id) {
            node.status = status;
            node.updated = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn upsert(&self, task: &Task) -> ScriptFlowResult<()> {
        let existed = {
            let mut state = self.state.lock().unwrap();
            state.tasks.insert(task.id.clone(), task.clone()).is_some()
        };
        let event = if existed {
            RecordEvent::TaskUpdated { task: task.clone() }
        } else {
            RecordEvent::TaskCreated { task: task.clone() }
        };
        self.emit(event);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Task>> {
        Ok(self.state.lock().unwrap().tasks.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> ScriptFlowResult<()> {
        let removed = self.state.lock().unwrap().tasks.remove(id).is_some();
        if removed {
            self.emit(RecordEvent::TaskDeleted {
                task_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_active_tasks(&self) -> ScriptFlowResult<Vec<Task>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect())
    }

    async fn get_by_project(&self, project_id: &str) -> ScriptFlowResult<Vec<Task>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.project == project_id)
            .cloned()
            .collect())
    }

    async fn set_failure_count(&self, id: &str, count: i64) -> ScriptFlowResult<()> {
        if let Some(task) = self.state.lock().unwrap().tasks.get_mut(id) {
            task.consecutive_failure_count = count;
            task.updated = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl RunRepository for InMemoryStore {
    async fn create(&self, run: &NewRun) -> ScriptFlowResult<Run> {
        let created = {
            let mut state = self.state.lock().unwrap();
            let id = state.new_id("r");
            let now = Utc::now();
            let run = Run {
                id,
                task: run.task.clone(),
                host: run.host.clone(),
                command: run.command.clone(),
                status: RunStatus::Started,
                exit_code: None,
                connection_error: None,
                created: now,
                updated: now,
            };
            state.runs.push(run.clone());
            run
        };
        self.emit(RecordEvent::RunCreated {
            run: created.clone(),
        });
        Ok(created)
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Run>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn set_outcome(&self, id: &str, outcome: &RunOutcome) -> ScriptFlowResult<()> {
        let updated = {
            let mut state = self.state.lock().unwrap();
            match state
                .runs
                .iter_mut()
                .find(|r| r.id == id && r.status == RunStatus::Started)
            {
                Some(run) => {
                    run.status = outcome.status;
                    run.exit_code = outcome.exit_code;
                    run.connection_error = outcome.connection_error.clone();
                    run.updated = Utc::now();
                    Some(run.clone())
                }
                None => None,
            }
        };
        if let Some(run) = updated {
            self.emit(RecordEvent::RunUpdated { run });
        }
        Ok(())
    }

    async fn mark_started_as_interrupted(&self, message: &str) -> ScriptFlowResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut affected = 0;
        for run in state.runs.iter_mut().filter(|r| r.status == RunStatus::Started) {
            run.status = RunStatus::Interrupted;
            run.connection_error = Some(message.to_string());
            run.updated = Utc::now();
            affected += 1;
        }
        Ok(affected)
    }

    async fn latest_by_tasks(&self, task_ids: &[String]) -> ScriptFlowResult<Vec<Run>> {
        let state = self.state.lock().unwrap();
        let mut latest: HashMap<&str, &Run> = HashMap::new();
        for run in state.runs.iter().filter(|r| task_ids.contains(&r.task)) {
            match latest.get(run.task.as_str()) {
                Some(existing) if existing.created >= run.created => {}
                _ => {
                    latest.insert(run.task.as_str(), run);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn recent_statuses(
        &self,
        task_id: &str,
        newer_than: Option<DateTime<Utc>>,
        limit: i64,
    ) -> ScriptFlowResult<Vec<RunStatus>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<&Run> = state
            .runs
            .iter()
            .filter(|r| r.task == task_id)
            .filter(|r| newer_than.map_or(true, |w| r.created > w))
            .collect();
        matched.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(matched
            .into_iter()
            .take(limit as usize)
            .map(|r| r.status)
            .collect())
    }

    async fn delete_older_than(
        &self,
        task_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ScriptFlowResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.runs.len();
        state
            .runs
            .retain(|r| !(r.task == task_id && r.created < cutoff));
        Ok((before - state.runs.len()) as u64)
    }
}

#[async_trait]
impl ChannelRepository for InMemoryStore {
    async fn upsert(&self, channel: &Channel) -> ScriptFlowResult<()> {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Channel>> {
        Ok(self.state.lock().unwrap().channels.get(id).cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn upsert(&self, subscription: &Subscription) -> ScriptFlowResult<()> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Subscription>> {
        Ok(self.state.lock().unwrap().subscriptions.get(id).cloned())
    }

    async fn matching_run(
        &self,
        task_id: &str,
        status: RunStatus,
    ) -> ScriptFlowResult<Vec<Subscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.active && s.task == task_id && s.matches(status))
            .cloned()
            .collect())
    }

    async fn set_notified(&self, id: &str, when: DateTime<Utc>) -> ScriptFlowResult<()> {
        if let Some(subscription) = self.state.lock().unwrap().subscriptions.get_mut(id) {
            subscription.notified = Some(when);
            subscription.updated = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<Notification> {
        let mut state = self.state.lock().unwrap();
        let id = state.new_id("ntf");
        let now = Utc::now();
        let notification = Notification {
            id,
            subscription: subscription_id.to_string(),
            run: run_id.to_string(),
            sent: false,
            error_count: 0,
            created: now,
            updated: now,
        };
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn exists_for(&self, subscription_id: &str, run_id: &str) -> ScriptFlowResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .any(|n| n.subscription == subscription_id && n.run == run_id))
    }

    async fn next_unsent(&self, max_error_count: i64) -> ScriptFlowResult<Option<Notification>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .notifications
            .iter()
            .filter(|n| !n.sent && n.error_count <= max_error_count)
            .min_by_key(|n| n.updated)
            .cloned())
    }

    async fn mark_sent(&self, id: &str) -> ScriptFlowResult<()> {
        if let Some(notification) = self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
        {
            notification.sent = true;
            notification.updated = Utc::now();
        }
        Ok(())
    }

    async fn bump_error_count(&self, id: &str) -> ScriptFlowResult<()> {
        if let Some(notification) = self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
        {
            notification.error_count += 1;
            notification.updated = Utc::now();
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> ScriptFlowResult<Option<Notification>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }
}
