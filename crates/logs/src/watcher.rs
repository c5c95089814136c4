use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::debug;

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

/// 日志文件追加监视器
///
/// 注册时记录文件当前长度作为起始偏移，此后只投递严格新增的字节，
/// 历史内容由调用方先行消费（见 read_last_lines）。
pub struct LogWatcher {
    path: PathBuf,
    offset: u64,
    event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    // 监视器随句柄存活，drop 即停止
    _watcher: RecommendedWatcher,
}

impl LogWatcher {
    /// 注册文件监视
    pub fn watch(path: &Path) -> ScriptFlowResult<Self> {
        let offset = std::fs::metadata(path)
            .map_err(|e| ScriptFlowError::log_file(format!("读取文件长度失败: {e}")))?
            .len();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| ScriptFlowError::log_file(format!("创建文件监视器失败: {e}")))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| ScriptFlowError::log_file(format!("注册文件监视失败: {e}")))?;

        debug!(path = %path.display(), offset, "日志监视器已注册");
        Ok(Self {
            path: path.to_path_buf(),
            offset,
            event_rx,
            _watcher: watcher,
        })
    }

    /// 等待下一段新增内容
    ///
    /// 返回 None 表示监视器通道关闭；Err 表示监视器故障，调用方应结束跟踪。
    pub async fn next_chunk(&mut self) -> Option<ScriptFlowResult<String>> {
        loop {
            let event = match self.event_rx.recv().await? {
                Ok(event) => event,
                Err(e) => {
                    return Some(Err(ScriptFlowError::log_file(format!(
                        "文件监视器错误: {e}"
                    ))))
                }
            };

            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }

            match self.read_from_offset().await {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => return Some(Ok(chunk)),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// 从上次偏移读到文件尾，并推进偏移
    async fn read_from_offset(&mut self) -> ScriptFlowResult<String> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| ScriptFlowError::log_file(format!("打开日志文件失败: {e}")))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| ScriptFlowError::log_file(format!("定位日志文件失败: {e}")))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| ScriptFlowError::log_file(format!("读取日志文件失败: {e}")))?;
        self.offset += buf.len() as u64;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_delivers_only_new_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240101.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "old-history-line").unwrap();
        file.sync_data().unwrap();

        let mut watcher = LogWatcher::watch(&path).unwrap();

        writeln!(file, "new-line-X").unwrap();
        file.sync_data().unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(1), watcher.next_chunk())
            .await
            .expect("监视器应在1秒内投递新增内容")
            .unwrap()
            .unwrap();

        // 只有注册之后追加的内容，历史不重放
        assert!(chunk.contains("new-line-X"));
        assert!(!chunk.contains("old-history-line"));
    }

    #[tokio::test]
    async fn test_watcher_advances_offset_across_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240101.log");
        std::fs::write(&path, b"").unwrap();
        let mut watcher = LogWatcher::watch(&path).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();

        writeln!(file, "first").unwrap();
        file.sync_data().unwrap();
        let chunk1 = tokio::time::timeout(Duration::from_secs(1), watcher.next_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(chunk1.contains("first"));

        writeln!(file, "second").unwrap();
        file.sync_data().unwrap();
        let chunk2 = tokio::time::timeout(Duration::from_secs(1), watcher.next_chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(chunk2.contains("second"));
        assert!(!chunk2.contains("first"));
    }
}
