use serde::{Deserialize, Serialize};

/// 配置文件根结构
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub projects: Vec<ConfigProject>,
    #[serde(default)]
    pub nodes: Vec<ConfigNode>,
    #[serde(default)]
    pub tasks: Vec<ConfigTask>,
    #[serde(default)]
    pub channels: Vec<ConfigChannel>,
    #[serde(default)]
    pub subscriptions: Vec<ConfigSubscription>,
}

/// 应用级设置
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// 通知消息中任务/运行链接的基地址
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// 实时日志通道的访问令牌
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_address: String,
}

fn default_app_name() -> String {
    "ScriptFlow".to_string()
}

fn default_app_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:8090".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_url: default_app_url(),
            bind_address: default_bind_address(),
            auth_token: String::new(),
            sender_name: String::new(),
            sender_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigProject {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub config: ConfigProjectConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigProjectConfig {
    #[serde(default)]
    pub logs_max_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigNode {
    #[serde(default)]
    pub id: String,
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigTask {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub command: String,
    pub schedule: String,
    pub node: String,
    pub project: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub prepend_datetime: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigChannel {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: ConfigChannelConfig,
}

/// 通道配置的并集：email 用 to，slack 用 token/channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSubscription {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub task: String,
    pub channel: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    #[serde(default)]
    pub active: bool,
}

fn default_threshold() -> i64 {
    1
}
