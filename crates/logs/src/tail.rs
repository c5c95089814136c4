use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

/// 倒序分块读取的块大小
const CHUNK_SIZE: u64 = 1024;

/// 读取文件最后 n 行
///
/// 从文件尾向前按固定块读取并按换行拆分，凑够 n 行或到达文件头为止。
/// 文件行数不足 n 时返回全部行。
pub fn read_last_lines(path: &Path, n: usize) -> ScriptFlowResult<Vec<String>> {
    let mut file = File::open(path)
        .map_err(|e| ScriptFlowError::log_file(format!("打开日志文件失败: {e}")))?;
    let size = file
        .metadata()
        .map_err(|e| ScriptFlowError::log_file(format!("读取文件元数据失败: {e}")))?
        .len();

    let mut lines: Vec<String> = Vec::new();
    let mut cursor = size;
    let mut current_line = String::new();
    let mut buf = vec![0u8; CHUNK_SIZE as usize];

    while lines.len() < n && cursor > 0 {
        let chunk_size = CHUNK_SIZE.min(cursor);
        cursor -= chunk_size;

        file.seek(SeekFrom::Start(cursor))
            .map_err(|e| ScriptFlowError::log_file(format!("定位日志文件失败: {e}")))?;
        let read = file
            .read(&mut buf[..chunk_size as usize])
            .map_err(|e| ScriptFlowError::log_file(format!("读取日志文件失败: {e}")))?;

        current_line = format!(
            "{}{}",
            String::from_utf8_lossy(&buf[..read]),
            current_line
        );
        let mut parts: Vec<String> = current_line.split('\n').map(|s| s.to_string()).collect();
        if parts.len() > 1 {
            current_line = parts.remove(0);
            parts.extend(lines);
            lines = parts;
        }
    }

    if !current_line.is_empty() && lines.len() < n {
        lines.insert(0, current_line);
    }

    // 文件以换行结尾时末尾会多出一个空串
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    if lines.len() > n {
        let drop = lines.len() - n;
        lines.drain(..drop);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(count: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..count {
            writeln!(file, "line-{i}").unwrap();
        }
        file
    }

    #[test]
    fn test_tail_returns_last_n() {
        let file = write_lines(50);
        let lines = read_last_lines(file.path(), 10).unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "line-40");
        assert_eq!(lines[9], "line-49");
    }

    #[test]
    fn test_tail_fewer_lines_than_requested() {
        let file = write_lines(3);
        let lines = read_last_lines(file.path(), 100).unwrap();
        assert_eq!(lines, vec!["line-0", "line-1", "line-2"]);
    }

    #[test]
    fn test_tail_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let lines = read_last_lines(file.path(), 10).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_tail_no_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a\nb\nc").unwrap();
        let lines = read_last_lines(file.path(), 10).unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tail_lines_longer_than_chunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let long_line = "x".repeat(3000);
        writeln!(file, "first").unwrap();
        writeln!(file, "{long_line}").unwrap();
        writeln!(file, "last").unwrap();
        let lines = read_last_lines(file.path(), 2).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], long_line);
        assert_eq!(lines[1], "last");
    }
}
