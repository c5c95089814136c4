use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

/// 运行分隔行前缀，日志中唯一的带内标记
pub const LOG_SEPARATOR_PREFIX: &str = "[scriptflow] run";

/// 提取结果的滚动窗口上限，超出时丢弃最旧的行
const MAX_EXTRACT_LINES: usize = 10_000;

static LOG_DELIMITER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[.*\] \[scriptflow\] run (\S+)$").unwrap());

/// 从日志文件提取某次运行的输出
///
/// 从匹配 run_id 的分隔行开始收集，直到遇到 run_id 不同的下一条分隔行或
/// 文件结尾。文件中不存在该 run_id 时返回空列表。
pub fn extract_logs_for_run(log_file_path: &Path, run_id: &str) -> ScriptFlowResult<Vec<String>> {
    let file = File::open(log_file_path).map_err(|e| {
        ScriptFlowError::log_file(format!("打开日志文件 {} 失败: {e}", log_file_path.display()))
    })?;

    let mut collecting = false;
    let mut logs: Vec<String> = Vec::new();
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line =
            line.map_err(|e| ScriptFlowError::log_file(format!("读取日志文件失败: {e}")))?;

        if let Some(captures) = LOG_DELIMITER_RE.captures(&line) {
            let current_run_id = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            if current_run_id == run_id {
                collecting = true;
                push_rolling(&mut logs, line);
            } else {
                if collecting {
                    break;
                }
                collecting = false;
            }
        } else if collecting {
            push_rolling(&mut logs, line);
        }
    }
    Ok(logs)
}

fn push_rolling(logs: &mut Vec<String>, line: String) {
    if logs.len() == MAX_EXTRACT_LINES {
        logs.remove(0);
    }
    logs.push(line);
}
