//! 声明式配置
//!
//! YAML 配置文件定义项目、节点、任务、通道与订阅，重载时同步进存储。
//! 应用级设置（名称、URL、API 绑定地址等）放在可选的 settings 段。

mod ids;
mod models;

pub use ids::{generate_id_from_name, is_valid_id};
pub use models::*;

use std::path::Path;

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

/// 读取并解析配置文件
pub fn load_config(path: &Path) -> ScriptFlowResult<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| ScriptFlowError::config_error(format!("读取配置文件失败: {e}")))?;
    parse_config(&data)
}

pub fn parse_config(data: &str) -> ScriptFlowResult<Config> {
    serde_yaml::from_str(data)
        .map_err(|e| ScriptFlowError::config_error(format!("解析配置文件失败: {e}")))
}
