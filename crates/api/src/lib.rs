//! HTTP API
//!
//! 实时日志 websocket 通道、按运行提取日志、任务最新运行批查询、
//! 终止运行与进程统计。认证后端在范围之外，通过注入的 AuthOracle 校验。

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AuthOracle, StaticTokenOracle};
pub use error::{ApiError, ApiResult};
pub use routes::{create_app, AppState};
