//! 日志文件管理
//!
//! 每个任务按 UTC 日期落到 `{logs_dir}/{task_id}/YYYYMMDD.log` 的追加文件。
//! 运行分隔行是日志里唯一的带内标记，按运行提取与实时跟踪都依赖它。

mod extract;
mod store;
mod tail;
mod watcher;

pub use extract::{extract_logs_for_run, LOG_SEPARATOR_PREFIX};
pub use store::{task_file_date, write_run_separator, LogStore};
pub use tail::read_last_lines;
pub use watcher::LogWatcher;
