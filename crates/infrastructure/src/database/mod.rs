pub mod sqlite;

pub use sqlite::Store;

use uuid::Uuid;

/// 生成记录 id（不透明字符串）
pub(crate) fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}
