//! 测试工具
//!
//! 内存版实体存储与实体构造器，供核心引擎的单元测试使用。
//! 事件发射规则与 SQLite 实现保持一致。

mod builders;
mod memory;

pub use builders::{channel, node, project, subscription, task};
pub use memory::InMemoryStore;
