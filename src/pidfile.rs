use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

fn pid_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("scriptflow.pid")
}

/// 写入 PID 文件
///
/// 已有 PID 文件且进程仍在运行时报错；进程已死则替换陈旧文件。
pub fn create_pid_file(data_dir: &Path) -> Result<()> {
    let pid_file = pid_file_path(data_dir);

    if pid_file.exists() {
        if let Ok(existing_pid) = find_scriptflow_pid(data_dir) {
            anyhow::bail!("ScriptFlow 已在运行 (PID: {existing_pid})");
        }
        info!("移除陈旧的PID文件: {}", pid_file.display());
        let _ = std::fs::remove_file(&pid_file);
    }

    std::fs::write(&pid_file, format!("{}", std::process::id()))
        .with_context(|| format!("写入PID文件失败: {}", pid_file.display()))?;
    info!("PID文件已创建: {}", pid_file.display());
    Ok(())
}

pub fn remove_pid_file(data_dir: &Path) {
    let _ = std::fs::remove_file(pid_file_path(data_dir));
}

/// 读取 PID 文件并确认进程仍在运行
pub fn find_scriptflow_pid(data_dir: &Path) -> Result<i32> {
    let pid_file = pid_file_path(data_dir);
    let data = std::fs::read_to_string(&pid_file)
        .with_context(|| format!("PID文件不存在或不可读: {}", pid_file.display()))?;

    let pid: i32 = data.trim().parse().context("PID文件内容非法")?;

    // 信号 0 只做存活探测
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None)
        .with_context(|| format!("进程 {pid} 不在运行"))?;

    Ok(pid)
}
