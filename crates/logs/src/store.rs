use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

/// 任务日志根目录管理
///
/// 目录布局：`{logs_dir}/{task_id}/YYYYMMDD.log`，文件名取 UTC 日期。
#[derive(Debug, Clone)]
pub struct LogStore {
    logs_dir: PathBuf,
}

impl LogStore {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// {logs_dir}/{task_id}
    pub fn task_log_root_dir(&self, task_id: &str) -> PathBuf {
        self.logs_dir.join(task_id)
    }

    /// {logs_dir}/{task_id}/{YYYYMMDD}.log
    pub fn task_log_file_path(&self, task_id: &str, datetime: DateTime<Utc>) -> PathBuf {
        self.task_log_root_dir(task_id)
            .join(task_log_file_name(datetime))
    }

    /// 今天（UTC）的日志文件路径
    pub fn task_today_log_file_path(&self, task_id: &str) -> PathBuf {
        self.task_log_file_path(task_id, Utc::now())
    }

    /// 打开今天的日志文件用于追加，目录与文件不存在时创建
    pub fn create_log_file(&self, task_id: &str) -> ScriptFlowResult<File> {
        let file_path = self.task_today_log_file_path(task_id);
        let log_dir = file_path
            .parent()
            .ok_or_else(|| ScriptFlowError::log_file("日志文件路径没有父目录"))?;
        fs::create_dir_all(log_dir)
            .map_err(|e| ScriptFlowError::log_file(format!("创建日志目录失败: {e}")))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .map_err(|e| ScriptFlowError::log_file(format!("打开日志文件失败: {e}")))
    }

    /// 删除任务的整个日志目录（任务删除时异步调用）
    pub fn remove_task_logs(&self, task_id: &str) -> ScriptFlowResult<()> {
        let dir = self.task_log_root_dir(task_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| ScriptFlowError::log_file(format!("删除任务日志目录失败: {e}")))?;
        }
        Ok(())
    }
}

/// {year}{month}{day}.log
fn task_log_file_name(datetime: DateTime<Utc>) -> String {
    format!("{}.log", datetime.format("%Y%m%d"))
}

/// 写入运行分隔行：`[<RFC3339>] [scriptflow] run <runId>`
pub fn write_run_separator(file: &mut File, run_id: &str) -> ScriptFlowResult<()> {
    let mark = format!(
        "[{}] {} {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        crate::LOG_SEPARATOR_PREFIX,
        run_id
    );
    file.write_all(mark.as_bytes())
        .and_then(|_| file.sync_data())
        .map_err(|e| ScriptFlowError::log_file(format!("写入运行分隔行失败: {e}")))
}

/// 从日志文件名解析日期
///
/// 仅接受严格的 `YYYYMMDD.log`（定长 12 字符）；其余文件不参与保留清理。
pub fn task_file_date(file_name: &str) -> ScriptFlowResult<NaiveDate> {
    if file_name.len() != 12 || !file_name.ends_with(".log") {
        return Err(ScriptFlowError::InvalidLogFileName(file_name.to_string()));
    }
    let date_str = &file_name[..8];
    NaiveDate::parse_from_str(date_str, "%Y%m%d")
        .map_err(|_| ScriptFlowError::FailedParseDate(file_name.to_string()))
}
