//! 基础设施层
//!
//! 嵌入式 SQLite 实体存储：仓储实现、内联迁移与记录变更事件广播。

pub mod database;

pub use database::Store;
