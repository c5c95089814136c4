//! 记录变更事件
//!
//! 存储在每次成功写入后广播变更事件，调度器、通知管道等组件据此解耦联动。

use serde::{Deserialize, Serialize};

use crate::entities::{Node, Run, Task};

/// 存储层记录变更事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordEvent {
    TaskCreated { task: Task },
    TaskUpdated { task: Task },
    TaskDeleted { task_id: String },
    NodeUpdated { node: Node },
    RunCreated { run: Run },
    RunUpdated { run: Run },
}

impl RecordEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RecordEvent::TaskCreated { .. } => "TaskCreated",
            RecordEvent::TaskUpdated { .. } => "TaskUpdated",
            RecordEvent::TaskDeleted { .. } => "TaskDeleted",
            RecordEvent::NodeUpdated { .. } => "NodeUpdated",
            RecordEvent::RunCreated { .. } => "RunCreated",
            RecordEvent::RunUpdated { .. } => "RunUpdated",
        }
    }

    /// 事件关联的记录 id
    pub fn record_id(&self) -> &str {
        match self {
            RecordEvent::TaskCreated { task } | RecordEvent::TaskUpdated { task } => &task.id,
            RecordEvent::TaskDeleted { task_id } => task_id,
            RecordEvent::NodeUpdated { node } => &node.id,
            RecordEvent::RunCreated { run } | RecordEvent::RunUpdated { run } => &run.id,
        }
    }
}
