//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use clap::Parser;
use std::path::PathBuf;

/// 过滤引擎命令行工具
///
/// 读取过滤树和记录数组，经由执行管道本地求值，输出匹配的记录。
#[derive(Parser, Debug)]
#[command(name = "filter-engine")]
#[command(version, about = "过滤树本地求值工具")]
pub struct Cli {
    /// 过滤树 JSON 文件
    pub ast: PathBuf,

    /// 待过滤的记录数组 JSON 文件
    pub items: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// 结束时向 stderr 输出 Prometheus 格式的指标快照
    #[arg(long)]
    pub print_metrics: bool,
}
