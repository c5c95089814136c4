//! ScriptFlow 领域模型
//!
//! 核心实体定义、仓储接口与记录变更事件。实体仅以字符串 id 相互引用，
//! 环状关系（任务↔运行、订阅↔通知）通过按需加载解开。

pub mod entities;
pub mod events;
pub mod repositories;
pub mod store;

pub use entities::*;
pub use events::RecordEvent;
pub use repositories::*;
pub use store::EntityStore;
