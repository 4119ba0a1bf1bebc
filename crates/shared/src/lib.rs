//! 共享库
//!
//! 过滤引擎及其工具共用的基础设施：分层配置加载、日志与指标、重试策略。

pub mod config;
pub mod observability;
pub mod retry;
