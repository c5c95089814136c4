use chrono::Utc;

use scriptflow_domain::{
    Channel, ChannelKind, Node, NodeStatus, Project, ProjectConfig, RunStatus, Subscription, Task,
};

pub fn project(id: &str) -> Project {
    let now = Utc::now();
    Project {
        id: id.to_string(),
        name: id.to_string(),
        config: ProjectConfig::default(),
        created: now,
        updated: now,
    }
}

pub fn node(id: &str, host: &str, status: NodeStatus) -> Node {
    let now = Utc::now();
    Node {
        id: id.to_string(),
        host: host.to_string(),
        username: "deploy".to_string(),
        private_key: None,
        status,
        created: now,
        updated: now,
    }
}

pub fn task(id: &str, command: &str, schedule: &str, node_id: &str) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        name: id.to_string(),
        command: command.to_string(),
        schedule: schedule.to_string(),
        node: node_id.to_string(),
        project: "p1".to_string(),
        active: true,
        prepend_datetime: false,
        consecutive_failure_count: 0,
        created: now,
        updated: now,
    }
}

pub fn channel(id: &str, kind: ChannelKind) -> Channel {
    let now = Utc::now();
    let config = match kind {
        ChannelKind::Email => serde_json::json!({"to": "ops@example.com"}),
        ChannelKind::Slack => serde_json::json!({"token": "xoxb-test", "channel": "#ops"}),
    };
    Channel {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        config,
        created: now,
        updated: now,
    }
}

pub fn subscription(id: &str, task_id: &str, events: Vec<RunStatus>, threshold: i64) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: id.to_string(),
        name: id.to_string(),
        task: task_id.to_string(),
        channel: "c1".to_string(),
        events,
        threshold,
        active: true,
        notified: None,
        created: now,
        updated: now,
    }
}
